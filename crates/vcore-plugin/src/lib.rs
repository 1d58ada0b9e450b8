pub mod app;
pub mod arch;
pub mod cgroup;
pub mod config;
pub mod device;
pub mod k8s;
pub mod plugin;
