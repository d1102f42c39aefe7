//! GPU texture resources.
//!
//! This module contains the texture types created by [`GraphicsDevice`]:
//! - [`Texture`] - 1D, 2D, array and cube textures
//! - [`Volume`] - 3D textures
//! - [`TextureView`] - cached single-mip views for framebuffer attachments
//!
//! Both texture kinds implement [`TextureResource`] on top of a shared
//! [`TextureStorage`]. Resources are reference-counted with [`Arc`] and can be
//! shared across threads.
//!
//! [`GraphicsDevice`]: crate::GraphicsDevice
//! [`Arc`]: std::sync::Arc

mod resource;
mod storage;
mod texture;
mod view;
mod volume;

pub use resource::TextureResource;
pub use storage::{TextureId, TextureStorage};
pub use texture::Texture;
pub use view::TextureView;
pub use volume::Volume;
