pub mod auth;
pub mod conversations;
pub mod error;
pub mod feed;
pub mod members;
pub mod menu;
pub mod messages;
pub mod middleware;
pub mod routes;
pub mod users;

mod util;
