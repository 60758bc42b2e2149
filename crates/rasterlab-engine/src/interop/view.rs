use super::error::{PreconditionError, Result};
use super::format::ElementType;
use super::runtime::DevicePointer;

/// Non-owning, strided description of a 3D array in device memory.
///
/// Shape is always `(height, width, channels)`: a transfer buffer is row-major
/// with rows of `width × channels` elements, so the slowest axis is the row.
/// Interpreting the same memory as `(width, height, channels)` would transpose
/// any non-square image.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct DeviceArrayView {
    pointer: DevicePointer,
    shape: [u32; 3],
    // Byte strides, C order.
    strides: [u64; 3],
    element: ElementType,
}

impl DeviceArrayView {
    /// Describes `pointer` as a C-ordered `(height, width, channels)` array.
    ///
    /// Fails if the array does not fit in the mapped range.
    pub fn from_pointer(
        pointer: DevicePointer,
        height: u32,
        width: u32,
        channels: u32,
        element: ElementType,
    ) -> Result<Self> {
        let e = element.size() as u64;
        let strides = [width as u64 * channels as u64 * e, channels as u64 * e, e];
        let view = Self {
            pointer,
            shape: [height, width, channels],
            strides,
            element,
        };

        if view.byte_len() > pointer.size() {
            return Err(PreconditionError::ViewShape(format!(
                "array of {} bytes exceeds mapped range of {} bytes",
                view.byte_len(),
                pointer.size()
            ))
            .into());
        }
        Ok(view)
    }

    #[inline]
    pub fn pointer(&self) -> DevicePointer {
        self.pointer
    }

    /// `(height, width, channels)`.
    #[inline]
    pub fn shape(&self) -> (u32, u32, u32) {
        (self.shape[0], self.shape[1], self.shape[2])
    }

    /// Byte strides for `(row, column, channel)`.
    #[inline]
    pub fn strides(&self) -> (u64, u64, u64) {
        (self.strides[0], self.strides[1], self.strides[2])
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.shape[0]
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.shape[1]
    }

    #[inline]
    pub fn channels(&self) -> u32 {
        self.shape[2]
    }

    #[inline]
    pub fn element(&self) -> ElementType {
        self.element
    }

    /// Bytes spanned by the array.
    pub fn byte_len(&self) -> u64 {
        self.shape[0] as u64 * self.strides[0]
    }

    /// Byte offset of `(row, column, channel)` relative to the view's pointer.
    #[inline]
    pub fn offset_of(&self, row: u32, column: u32, channel: u32) -> u64 {
        row as u64 * self.strides[0]
            + column as u64 * self.strides[1]
            + channel as u64 * self.strides[2]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_is_height_major() {
        let ptr = DevicePointer::new(1, 6 * 4 * 3 * 4);
        let v = DeviceArrayView::from_pointer(ptr, 4, 6, 3, ElementType::F32).unwrap();
        assert_eq!(v.shape(), (4, 6, 3));
        assert_eq!(v.strides(), (6 * 3 * 4, 3 * 4, 4));
        // Last element of the last row ends exactly at the buffer end.
        assert_eq!(v.offset_of(3, 5, 2) + 4, v.byte_len());
    }

    #[test]
    fn oversized_view_is_rejected() {
        let ptr = DevicePointer::new(1, 15);
        let err = DeviceArrayView::from_pointer(ptr, 2, 2, 4, ElementType::U8).unwrap_err();
        assert!(matches!(
            err.precondition(),
            Some(PreconditionError::ViewShape(_))
        ));
    }
}
