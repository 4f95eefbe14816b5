pub mod tls;

pub use tls::TlsConfig;
