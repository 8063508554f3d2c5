pub mod actor;
pub mod webhook;

pub use actor::{require_actor, Actor, ACTOR_HEADER};
pub use webhook::{gateway_key_layer, GATEWAY_KEY_HEADER};
