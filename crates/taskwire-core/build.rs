/// Builds the gRPC client and server code for the `taskwire.proto` definition
/// using `tonic-prost-build`.
///
/// This code generation step processes the Protocol Buffer definitions located
/// in the `proto` directory and emits Rust modules with gRPC bindings into the
/// crate's `OUT_DIR`.
///
/// # Generated Code
///
/// Both halves of the service are generated:
///
/// - the client (`task_service_client`) is what workers use to subscribe to
///   task executions and report results;
/// - the server (`task_service_server`) is used by tests and tooling that need
///   to stand in for an orchestrator.
///
/// # Files and Paths
///
/// - Proto file: `proto/taskwire.proto`
/// - Includes: `proto/`
///
/// # Panics
///
/// This function will `panic!` if code generation fails.
///
/// # Output
///
/// Generated code will be accessible in Rust via:
///
/// ```rust,ignore
/// pub mod proto {
///     tonic::include_proto!("taskwire");
/// }
/// ```
fn main() {
    println!("cargo:rerun-if-changed=proto/taskwire.proto");

    tonic_prost_build::configure()
        .build_client(true)
        .build_server(true)
        .compile_protos(&["proto/taskwire.proto"], &["proto"])
        .unwrap();
}
