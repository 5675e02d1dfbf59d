//! winproc engine
//!
//! A library for supervising fleets of long-running gRPC server executables:
//! - Instance lifecycle management with port auto-allocation
//! - Versioned binary provisioning from a release source
//! - Health-gated hot restarts and staged hot deploys
//! - A pattern-routed gRPC load balancer and a dynamic gRPC-Web proxy
//! - A reflection-driven service registry
//!
//! ## Architecture
//!
//! The engine follows hexagonal (ports and adapters) architecture:
//!
//! - **Domain**: entities, value objects, and the supervision services
//! - **Adapters**: REST, native gRPC, gRPC-Web, and load-balancer fronts
//! - **Infrastructure**: concrete executor, release source, persistence
//!
//! The daemon binary (`winprocd`) wires these modules together.

pub mod constants;

pub mod adapters;
pub mod domain;
pub mod infrastructure;

// Generated protobuf types
pub mod proto {
    pub mod winproc {
        tonic::include_proto!("winproc.v1");

        // Include file descriptor for reflection
        pub const FILE_DESCRIPTOR_SET: &[u8] =
            tonic::include_file_descriptor_set!("proto_descriptor");
    }

    pub mod reflection {
        tonic::include_proto!("grpc.reflection.v1alpha");
    }
}
