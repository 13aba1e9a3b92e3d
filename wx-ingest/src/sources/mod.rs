pub mod sdr_stream;

pub use sdr_stream::SdrStreamSource;
