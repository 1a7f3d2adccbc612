mod client;

pub use client::{
    CustomField, PostFields, PostStub, RemotePost, RemoteTerm, RpcClient, RpcError, Taxonomy,
    TermFields, PROTOCOL_VERSION,
};
