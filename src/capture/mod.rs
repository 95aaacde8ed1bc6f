pub mod packet;

pub use packet::{
    flow_key, protocol_name, PacketIdGenerator, PacketInfo, TcpFlag, TcpFlags, PROTO_TCP, PROTO_UDP,
};
