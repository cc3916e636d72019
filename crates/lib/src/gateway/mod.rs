//! Gateway: HTTP server for LINE webhooks, tenant registration, and staged attachments.
//!
//! Routes: `GET /` health, `POST /api/:channel_id` webhook, `GET|POST /register`,
//! `GET /static/:file_name`.

mod register;
mod server;

pub use server::{build_state, router, run_gateway, GatewayState, LINE_SIGNATURE_HEADER};
