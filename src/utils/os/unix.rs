use rama::telemetry::tracing;

pub(super) fn raise_nofile(target: u64) {
    let mut limits = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };

    // SAFETY: `limits` is a valid, appropriately-sized out-parameter for
    // `getrlimit`/`setrlimit`, and `RLIMIT_NOFILE` is a well-known resource.
    if unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut limits) } != 0 {
        tracing::warn!("failed to read RLIMIT_NOFILE, skip raising it");
        return;
    }

    if limits.rlim_cur >= target {
        return;
    }

    let new_cur = target.min(limits.rlim_max);
    let desired = libc::rlimit {
        rlim_cur: new_cur,
        rlim_max: limits.rlim_max,
    };

    // SAFETY: same as above; `desired` only lowers `rlim_cur` to at most the
    // existing hard limit, never raising the hard limit itself.
    if unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, &desired) } != 0 {
        tracing::warn!(target, "failed to raise RLIMIT_NOFILE");
    } else {
        tracing::debug!(nofile = new_cur, "raised RLIMIT_NOFILE");
    }
}
