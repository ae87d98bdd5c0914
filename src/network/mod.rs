//! Network Layer
//!
//! WebSocket server exposing commit, reveal, verification and derivation
//! to operators and players. All protocol rules live in `proof/` and
//! `ledger/`; this layer only routes and authorizes.

pub mod auth;
pub mod protocol;
pub mod server;

pub use auth::{validate_token, AuthConfig, AuthError, TokenClaims};
pub use protocol::{
    ClientEnvelope, ClientMessage, ErrorCode, RoundRequest, ServerEnvelope, ServerError,
    ServerMessage, SubscribeRequest,
};
pub use server::{GameServer, GameServerError, ServerConfig};
