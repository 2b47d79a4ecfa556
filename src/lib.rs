// Library for tests to access modules

pub mod broadcast;
pub mod config;
pub mod docker_collector;
pub mod models;
pub mod services;
pub mod system_sampler;
pub mod version;
pub mod worker;
