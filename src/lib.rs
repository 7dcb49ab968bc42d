pub mod auth;
pub mod messages;
pub mod peer;
pub mod util;
pub mod test_util;
