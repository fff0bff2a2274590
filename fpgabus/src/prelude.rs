//! Prelude (helpful reexports) for this package

pub use crate::{
    core::{
        AddressTable,
        Mode,
        Permission,
        RegisterDescriptor,
    },
    handle::ResultHandle,
    node::Node,
    session::{
        connect,
        CancelHandle,
        Session,
        SessionConfig,
    },
    transport::{
        mock::Mock,
        tcp::Tcp,
        udp::Udp,
        Transport,
    },
};
