pub mod pipe;
pub mod ring_buffer;

pub use pipe::CgiPipes;
pub use ring_buffer::RingBuffer;
