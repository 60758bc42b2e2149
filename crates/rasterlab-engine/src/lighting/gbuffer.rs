use std::collections::BTreeMap;

use crate::interop::{
    DeviceTexture, GraphicsDevice, PreconditionError, Result, TextureDescription,
};

/// Named render target of the geometry pass.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Attachment {
    Color,
    WorldPosition,
    WorldNormal,
    Uv,
    MeshId,
    /// Output of the lighting pass, sampled by the display pass.
    Lit,
}

impl Attachment {
    pub const ALL: [Attachment; 6] = [
        Attachment::Color,
        Attachment::WorldPosition,
        Attachment::WorldNormal,
        Attachment::Uv,
        Attachment::MeshId,
        Attachment::Lit,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Attachment::Color => "color",
            Attachment::WorldPosition => "world_position",
            Attachment::WorldNormal => "world_normal",
            Attachment::Uv => "uv",
            Attachment::MeshId => "mesh_id",
            Attachment::Lit => "lit",
        }
    }
}

/// Attachment set and extent of a [`GBuffer`].
#[derive(Debug, Clone)]
pub struct GBufferLayout {
    width: u32,
    height: u32,
    attachments: BTreeMap<Attachment, TextureDescription>,
}

impl GBufferLayout {
    /// Color, world position, world normal and an RGBA8 lit target.
    pub fn standard(width: u32, height: u32) -> Self {
        let attachments = BTreeMap::from([
            (Attachment::Color, TextureDescription::rgba8(width, height)),
            (Attachment::WorldPosition, TextureDescription::rgba32f(width, height)),
            (Attachment::WorldNormal, TextureDescription::rgba32f(width, height)),
            (Attachment::Lit, TextureDescription::rgba8(width, height)),
        ]);
        Self {
            width,
            height,
            attachments,
        }
    }

    /// [`standard`](Self::standard) plus uv and mesh-id targets.
    pub fn full(width: u32, height: u32) -> Self {
        Self::standard(width, height)
            .with(Attachment::Uv, TextureDescription::rg32f(width, height))
            .with(Attachment::MeshId, TextureDescription::r32i(width, height))
    }

    /// Adds or replaces an attachment. The description is resized to the layout extent.
    pub fn with(mut self, attachment: Attachment, desc: TextureDescription) -> Self {
        self.attachments
            .insert(attachment, desc.with_size(self.width, self.height));
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn description(&self, attachment: Attachment) -> Option<&TextureDescription> {
        self.attachments.get(&attachment)
    }

    pub fn attachments(&self) -> impl Iterator<Item = Attachment> + '_ {
        self.attachments.keys().copied()
    }
}

/// The textures a geometry pass renders into, resized together.
pub struct GBuffer<G: GraphicsDevice> {
    width: u32,
    height: u32,
    textures: BTreeMap<Attachment, DeviceTexture<G>>,
}

impl<G: GraphicsDevice> GBuffer<G> {
    pub fn new(device: &G, layout: &GBufferLayout) -> Result<Self> {
        let mut textures = BTreeMap::new();
        for (&attachment, desc) in &layout.attachments {
            let texture = DeviceTexture::new(device.clone(), *desc, attachment.label())?;
            textures.insert(attachment, texture);
        }
        log::debug!(
            "g-buffer created: {}x{}, {} attachment(s)",
            layout.width,
            layout.height,
            textures.len()
        );
        Ok(Self {
            width: layout.width,
            height: layout.height,
            textures,
        })
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn contains(&self, attachment: Attachment) -> bool {
        self.textures.contains_key(&attachment)
    }

    pub fn get(&self, attachment: Attachment) -> Result<&DeviceTexture<G>> {
        self.textures
            .get(&attachment)
            .ok_or_else(|| PreconditionError::MissingAttachment(attachment.label()).into())
    }

    pub fn iter(&self) -> impl Iterator<Item = (Attachment, &DeviceTexture<G>)> + '_ {
        self.textures.iter().map(|(a, t)| (*a, t))
    }

    /// Resizes every attachment. Returns whether the extent changed.
    pub fn resize_if_needed(&mut self, width: u32, height: u32) -> Result<bool> {
        if (self.width, self.height) == (width, height) {
            return Ok(false);
        }
        for texture in self.textures.values_mut() {
            texture.resize_if_needed(width, height)?;
        }
        self.width = width;
        self.height = height;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::host::HostDevice;
    use crate::interop::{ElementType, InternalFormat};

    #[test]
    fn standard_layout_attachments() {
        let layout = GBufferLayout::standard(8, 4);
        let names: Vec<_> = layout.attachments().collect();
        assert_eq!(
            names,
            [
                Attachment::Color,
                Attachment::WorldPosition,
                Attachment::WorldNormal,
                Attachment::Lit
            ]
        );
        let pos = layout.description(Attachment::WorldPosition).unwrap();
        assert_eq!(pos.element(), ElementType::F32);
        assert_eq!(pos.channels(), 4);
    }

    #[test]
    fn with_resizes_description() {
        let layout = GBufferLayout::full(8, 4)
            .with(Attachment::Lit, TextureDescription::rgba32f(1, 1));
        let lit = layout.description(Attachment::Lit).unwrap();
        assert_eq!(lit.size(), (8, 4));
        assert_eq!(lit.internal_format(), InternalFormat::Rgba32F);
        assert!(layout.description(Attachment::MeshId).is_some());
    }

    #[test]
    fn resize_touches_every_attachment() {
        let dev = HostDevice::new();
        let mut gb = GBuffer::new(&dev, &GBufferLayout::full(8, 4)).unwrap();
        assert_eq!(dev.live_textures(), 6);

        assert!(!gb.resize_if_needed(8, 4).unwrap());
        assert!(gb.resize_if_needed(16, 16).unwrap());
        assert_eq!(gb.size(), (16, 16));
        for (_, tex) in gb.iter() {
            assert_eq!((tex.width(), tex.height()), (16, 16));
        }
        assert_eq!(dev.live_textures(), 6);
    }

    #[test]
    fn missing_attachment_is_reported() {
        let dev = HostDevice::new();
        let gb = GBuffer::new(&dev, &GBufferLayout::standard(4, 4)).unwrap();
        let err = gb.get(Attachment::Uv).err().unwrap();
        assert_eq!(
            err.precondition(),
            Some(&PreconditionError::MissingAttachment("uv"))
        );
    }
}
