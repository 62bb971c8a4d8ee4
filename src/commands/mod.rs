pub mod ack;
pub mod agents;
pub mod bind;
pub mod check;
pub mod daemon;
pub mod inbox;
pub mod init;
pub mod send;
pub mod status;
pub mod sweep;
