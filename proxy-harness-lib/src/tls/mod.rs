pub mod acceptor;
pub mod connector;

pub use acceptor::build_acceptor;
pub use connector::build_connector;
