//! Generic route handlers shared by every resource.

mod dispatch;

pub(crate) use dispatch::{dispatch, method_not_allowed, not_found, root_schema, Incoming, RouteTarget};
