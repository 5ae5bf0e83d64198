mod codec;
mod relations;

pub use codec::{Alphabet, PathCodec, PathConfig};
