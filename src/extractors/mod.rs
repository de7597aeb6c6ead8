//! Request extractors.

mod identity;

pub use identity::{trust_identity_headers, Identity, ItemNeed, ROLES_HEADER, USER_ID_HEADER};
