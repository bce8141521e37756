pub mod binder;
pub mod device;
pub mod headless;
pub mod resources;

pub use binder::{BindReport, BoundResource, bind_for_draw};
pub use device::{
    BufferDesc, DeviceContext, DeviceError, ResourceDevice, ResourceHandle, SamplerDesc,
    TextureDesc,
};
pub use headless::{BindCall, HeadlessContext, HeadlessDevice};
pub use resources::{ResourceEntry, ResourceKind, ResourceRegistry};
