//! Relay core library: tenant registry, LINE and Coze clients, the webhook dispatcher,
//! and the HTTP gateway used by the CLI.

pub mod channels;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod gateway;
pub mod init;
pub mod llm;
pub mod registry;
pub mod storage;
pub mod tenant;
