//! Unit daemon library: the simulated CASU device, the request/reply
//! session state machine, and the TCP serve loop the daemon binary runs.

pub mod device;
pub mod serve;
pub mod session;
