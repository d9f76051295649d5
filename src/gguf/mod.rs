//! GGUF container format
//!
//! Reader, writer, and in-memory builder for GGUF v3, the container format
//! used by llama.cpp and whisper.cpp.
//!
//! - [`MappedGGUFContainer`]: memory-mapped reader handing out borrowed
//!   [`TensorDescriptor`]s in stored order
//! - [`GGUFWriter`]: `begin` / `copy_metadata` / `add_tensor` / `write`
//! - [`test_factory::GGUFBuilder`]: synthesizes containers for tests

mod io;
mod loader;
mod model;
pub mod test_factory;
mod types;
mod writer;

pub use model::MappedGGUFContainer;
pub use types::{
    align_offset, checked_n_elements, n_elements, payload_size, GGUFContainer, GGUFHeader,
    GGUFValue, GGUFValueType, TensorDescriptor, TensorInfo, GGUF_DEFAULT_ALIGNMENT, GGUF_MAGIC,
    GGUF_MAX_DIMS, GGUF_VERSION_V3, KEY_ALIGNMENT, KEY_ARCHITECTURE,
};
pub use writer::GGUFWriter;
