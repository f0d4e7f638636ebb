pub mod moka_cluster;

pub use moka_cluster::MokaCluster;
