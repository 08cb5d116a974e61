//! Real servers: the proxy listener is the only one this core has a socket
//! for (the teacher's meta HTTPS server with its `/ping`/`/ca`/`/pac` routes
//! and its pseudo "connectivity" responder have no counterpart in SPEC_FULL.md
//! §6, which only names file-based discovery).

pub mod proxy;
