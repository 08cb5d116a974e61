#[cfg(unix)]
mod unix;

/// Raises the process's open-file-descriptor limit to at least `target`, best
/// effort. Each MITM'd connection holds a client socket, an upstream socket,
/// and possibly a pooled upstream connection, so the default per-process
/// limit on many systems is easy to exhaust under concurrent package
/// installs.
pub fn raise_nofile(target: u64) {
    #[cfg(unix)]
    self::unix::raise_nofile(target);

    #[cfg(not(unix))]
    {
        let _ = target;
    }
}
