// Upstream metadata providers and the request gate they share

pub mod rate_limit;
pub mod tmdb;
pub mod tvdb;
