mod events;

pub use events::{events, healthz, not_found, openapi, root_redirect};
