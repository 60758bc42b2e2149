use super::error::{InteropError, Result};

/// Scalar type of one channel.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ElementType {
    U8,
    I32,
    F32,
}

impl ElementType {
    /// Size of one element in bytes.
    #[inline]
    pub const fn size(self) -> u32 {
        match self {
            ElementType::U8 => 1,
            ElementType::I32 | ElementType::F32 => 4,
        }
    }

    #[inline]
    pub const fn is_integer(self) -> bool {
        matches!(self, ElementType::I32)
    }
}

/// GPU-side storage format (bit depth and signedness per channel).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum InternalFormat {
    R8,
    Rg8,
    Rgb8,
    Rgba8,
    R32I,
    Rg32I,
    Rgb32I,
    Rgba32I,
    R32F,
    Rg32F,
    Rgb32F,
    Rgba32F,
}

impl InternalFormat {
    /// Channel count and element type this storage format holds.
    pub const fn components(self) -> (u32, ElementType) {
        use ElementType::*;
        match self {
            InternalFormat::R8 => (1, U8),
            InternalFormat::Rg8 => (2, U8),
            InternalFormat::Rgb8 => (3, U8),
            InternalFormat::Rgba8 => (4, U8),
            InternalFormat::R32I => (1, I32),
            InternalFormat::Rg32I => (2, I32),
            InternalFormat::Rgb32I => (3, I32),
            InternalFormat::Rgba32I => (4, I32),
            InternalFormat::R32F => (1, F32),
            InternalFormat::Rg32F => (2, F32),
            InternalFormat::Rgb32F => (3, F32),
            InternalFormat::Rgba32F => (4, F32),
        }
    }
}

/// Which channels a texel exposes, and whether they are read as integers.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ChannelLayout {
    Red,
    Rg,
    Rgb,
    Rgba,
    RedInteger,
    RgInteger,
    RgbInteger,
    RgbaInteger,
}

impl ChannelLayout {
    pub const fn channels(self) -> u32 {
        match self {
            ChannelLayout::Red | ChannelLayout::RedInteger => 1,
            ChannelLayout::Rg | ChannelLayout::RgInteger => 2,
            ChannelLayout::Rgb | ChannelLayout::RgbInteger => 3,
            ChannelLayout::Rgba | ChannelLayout::RgbaInteger => 4,
        }
    }

    pub const fn is_integer(self) -> bool {
        matches!(
            self,
            ChannelLayout::RedInteger
                | ChannelLayout::RgInteger
                | ChannelLayout::RgbInteger
                | ChannelLayout::RgbaInteger
        )
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub enum FilterMode {
    #[default]
    Nearest,
    Linear,
}

/// Immutable format plus mutable extent of a 2D texture.
///
/// Only the extent changes after construction (see [`with_size`](Self::with_size));
/// the format triple is validated once in [`new`](Self::new).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct TextureDescription {
    width: u32,
    height: u32,
    internal_format: InternalFormat,
    layout: ChannelLayout,
    element: ElementType,
    min_filter: FilterMode,
    mag_filter: FilterMode,
}

impl TextureDescription {
    /// Validates the format triple and builds a description with nearest filtering.
    ///
    /// Fails with [`InteropError::UnsupportedFormat`] when the channel layout or
    /// element type disagree with the internal format.
    pub fn new(
        width: u32,
        height: u32,
        internal_format: InternalFormat,
        layout: ChannelLayout,
        element: ElementType,
    ) -> Result<Self> {
        let (channels, storage_element) = internal_format.components();

        if storage_element != element {
            return Err(InteropError::UnsupportedFormat(format!(
                "{internal_format:?} stores {storage_element:?}, not {element:?}"
            )));
        }
        if layout.channels() != channels {
            return Err(InteropError::UnsupportedFormat(format!(
                "{internal_format:?} has {channels} channel(s), layout {layout:?} has {}",
                layout.channels()
            )));
        }
        if layout.is_integer() != element.is_integer() {
            return Err(InteropError::UnsupportedFormat(format!(
                "layout {layout:?} cannot carry {element:?} elements"
            )));
        }

        Ok(Self {
            width,
            height,
            internal_format,
            layout,
            element,
            min_filter: FilterMode::Nearest,
            mag_filter: FilterMode::Nearest,
        })
    }

    /// Builds a description directly from a storage format.
    pub fn from_internal(width: u32, height: u32, internal_format: InternalFormat) -> Self {
        let (channels, element) = internal_format.components();
        let layout = match (channels, element.is_integer()) {
            (1, false) => ChannelLayout::Red,
            (2, false) => ChannelLayout::Rg,
            (3, false) => ChannelLayout::Rgb,
            (_, false) => ChannelLayout::Rgba,
            (1, true) => ChannelLayout::RedInteger,
            (2, true) => ChannelLayout::RgInteger,
            (3, true) => ChannelLayout::RgbInteger,
            (_, true) => ChannelLayout::RgbaInteger,
        };
        Self {
            width,
            height,
            internal_format,
            layout,
            element,
            min_filter: FilterMode::Nearest,
            mag_filter: FilterMode::Nearest,
        }
    }

    pub fn rgb8(width: u32, height: u32) -> Self {
        Self::from_internal(width, height, InternalFormat::Rgb8)
    }

    pub fn rgba8(width: u32, height: u32) -> Self {
        Self::from_internal(width, height, InternalFormat::Rgba8)
    }

    pub fn rgb32f(width: u32, height: u32) -> Self {
        Self::from_internal(width, height, InternalFormat::Rgb32F)
    }

    pub fn rgba32f(width: u32, height: u32) -> Self {
        Self::from_internal(width, height, InternalFormat::Rgba32F)
    }

    pub fn rg32f(width: u32, height: u32) -> Self {
        Self::from_internal(width, height, InternalFormat::Rg32F)
    }

    pub fn r32f(width: u32, height: u32) -> Self {
        Self::from_internal(width, height, InternalFormat::R32F)
    }

    pub fn r32i(width: u32, height: u32) -> Self {
        Self::from_internal(width, height, InternalFormat::R32I)
    }

    /// Returns a copy with filtering replaced.
    pub fn with_filters(mut self, min_filter: FilterMode, mag_filter: FilterMode) -> Self {
        self.min_filter = min_filter;
        self.mag_filter = mag_filter;
        self
    }

    /// Returns a copy with the extent replaced; the format is untouched.
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn internal_format(&self) -> InternalFormat {
        self.internal_format
    }

    pub fn layout(&self) -> ChannelLayout {
        self.layout
    }

    pub fn element(&self) -> ElementType {
        self.element
    }

    pub fn min_filter(&self) -> FilterMode {
        self.min_filter
    }

    pub fn mag_filter(&self) -> FilterMode {
        self.mag_filter
    }

    #[inline]
    pub fn channels(&self) -> u32 {
        self.layout.channels()
    }

    /// `channels × element size`.
    #[inline]
    pub fn pixel_size(&self) -> u32 {
        self.channels() * self.element.size()
    }

    /// Tightly packed bytes per row.
    #[inline]
    pub fn row_bytes(&self) -> u64 {
        self.width as u64 * self.pixel_size() as u64
    }

    /// `width × height × pixel size`.
    #[inline]
    pub fn byte_size(&self) -> u64 {
        self.row_bytes() * self.height as u64
    }
}
