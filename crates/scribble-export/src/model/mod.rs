mod conv_op;
mod unet;

pub use conv_op::*;
pub use unet::*;
