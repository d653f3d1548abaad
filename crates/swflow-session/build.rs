// Code generation for the BuildKit session gRPC services
//
// メッセージ型は src/proto.rs に手書きで定義しているため protoc は不要です。

use tonic_build::manual::{Builder, Method, Service};

fn packet_stream(service: &str) -> Service {
    Service::builder()
        .name(service)
        .package("moby.filesync.v1")
        .method(
            Method::builder()
                .name("diff_copy")
                .route_name("DiffCopy")
                .input_type("crate::proto::Packet")
                .output_type("crate::proto::Packet")
                .codec_path("tonic::codec::ProstCodec")
                .client_streaming()
                .server_streaming()
                .build(),
        )
        .build()
}

fn main() {
    let health = Service::builder()
        .name("Health")
        .package("grpc.health.v1")
        .method(
            Method::builder()
                .name("check")
                .route_name("Check")
                .input_type("crate::proto::HealthCheckRequest")
                .output_type("crate::proto::HealthCheckResponse")
                .codec_path("tonic::codec::ProstCodec")
                .build(),
        )
        .build();

    Builder::new()
        .build_server(true)
        .build_client(true)
        .compile(&[packet_stream("FileSync"), packet_stream("FileSend"), health]);
}
