pub mod animation;
pub mod animvalue;
pub mod channel;
pub mod compressed;
pub mod config;
pub mod error;
pub mod frame_anim;
pub mod math;
pub mod schema;
pub mod skeleton;
pub mod stall;
pub mod staging;
pub mod zeroframe;

pub use animation::{AnimDesc, AnimationDecoder, BoneMapping, DecodePath, DecodeRequest, Pose, VirtualMapping};
pub use config::DecodeConfig;
pub use error::{DecodeError, ErrorKind};
