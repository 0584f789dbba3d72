pub mod accum;
pub mod addr_gen;
pub mod bank;
pub mod dispatch;
pub mod error;
pub mod frontend;
pub mod layer;
pub mod mapper;
pub mod output_mgr;
pub mod params;
pub mod pipeline;
pub mod scheduler;
pub mod top;

pub use error::{AxonError, Result};
pub use frontend::encode_frame;
pub use layer::{LayerConfig, LayerTable};
pub use params::{Opcode, StreamWord};
pub use top::AxonCore;
