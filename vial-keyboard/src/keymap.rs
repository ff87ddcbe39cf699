//! Dynamic keymap geometry and buffer codec

use serde::Serialize;

use crate::error::KeyboardError;
use crate::keycode::KeyCode;

/// Board geometry: matrix size and layer count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Geometry {
    pub rows: usize,
    pub cols: usize,
    pub layers: usize,
}

impl Geometry {
    pub fn keys_per_layer(&self) -> usize {
        self.rows * self.cols
    }

    /// Size of the whole keymap buffer in bytes
    pub fn buffer_len(&self) -> usize {
        self.layers * self.keys_per_layer() * 2
    }

    pub fn check_layer(&self, layer: usize) -> Result<(), KeyboardError> {
        if layer >= self.layers {
            return Err(KeyboardError::InvalidParameter(format!(
                "layer {layer} out of range (0-{})",
                self.layers.saturating_sub(1)
            )));
        }
        Ok(())
    }

    /// Flat index `row * cols + col`, bounds-checked
    pub fn index(&self, row: usize, col: usize) -> Result<usize, KeyboardError> {
        if row >= self.rows || col >= self.cols {
            return Err(KeyboardError::InvalidParameter(format!(
                "position {row},{col} outside the {}x{} matrix",
                self.rows, self.cols
            )));
        }
        Ok(row * self.cols + col)
    }

    /// Byte offset of a key inside the dynamic keymap buffer
    pub fn buffer_offset(&self, layer: usize, row: usize, col: usize) -> usize {
        (layer * self.keys_per_layer() + row * self.cols + col) * 2
    }
}

/// Per-layer flat key code arrays
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keymap {
    geometry: Geometry,
    layers: Vec<Vec<KeyCode>>,
}

impl Keymap {
    /// Split a raw big-endian keymap buffer into layers.
    ///
    /// A short buffer leaves the missing keys as `KC_NO`.
    pub fn decode(geometry: Geometry, buf: &[u8]) -> Self {
        let per_layer = geometry.keys_per_layer();
        let mut codes: Vec<KeyCode> = buf
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        codes.resize(geometry.layers * per_layer, 0);
        let layers = if per_layer == 0 {
            vec![Vec::new(); geometry.layers]
        } else {
            codes.chunks(per_layer).map(<[u16]>::to_vec).collect()
        };
        Self { geometry, layers }
    }

    /// Big-endian byte image of one layer
    pub fn encode_layer(codes: &[KeyCode]) -> Vec<u8> {
        codes.iter().flat_map(|c| c.to_be_bytes()).collect()
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub fn layers(&self) -> &[Vec<KeyCode>] {
        &self.layers
    }

    pub fn layer(&self, layer: usize) -> Result<&[KeyCode], KeyboardError> {
        self.geometry.check_layer(layer)?;
        Ok(&self.layers[layer])
    }

    pub fn get(&self, layer: usize, row: usize, col: usize) -> Result<KeyCode, KeyboardError> {
        self.geometry.check_layer(layer)?;
        let i = self.geometry.index(row, col)?;
        Ok(self.layers[layer][i])
    }

    pub fn set(
        &mut self,
        layer: usize,
        row: usize,
        col: usize,
        code: KeyCode,
    ) -> Result<(), KeyboardError> {
        self.geometry.check_layer(layer)?;
        let i = self.geometry.index(row, col)?;
        self.layers[layer][i] = code;
        Ok(())
    }

    /// Layer as rows of key codes
    pub fn rows(&self, layer: usize) -> Result<Vec<Vec<KeyCode>>, KeyboardError> {
        let codes = self.layer(layer)?;
        if self.geometry.cols == 0 {
            return Ok(Vec::new());
        }
        Ok(codes.chunks(self.geometry.cols).map(<[u16]>::to_vec).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GEOMETRY: Geometry = Geometry {
        rows: 2,
        cols: 3,
        layers: 2,
    };

    #[test]
    fn test_index_and_offset() {
        assert_eq!(GEOMETRY.index(1, 2).unwrap(), 5);
        assert_eq!(GEOMETRY.buffer_offset(1, 0, 1), (6 + 1) * 2);
        assert_eq!(GEOMETRY.buffer_len(), 24);
    }

    #[test]
    fn test_bounds() {
        assert!(GEOMETRY.index(2, 0).is_err());
        assert!(GEOMETRY.index(0, 3).is_err());
        assert!(GEOMETRY.check_layer(2).is_err());
        assert!(GEOMETRY.check_layer(1).is_ok());
    }

    #[test]
    fn test_decode_big_endian_layers() {
        let mut buf = Vec::new();
        for code in 0..12u16 {
            buf.extend_from_slice(&(0x0100 + code).to_be_bytes());
        }
        let keymap = Keymap::decode(GEOMETRY, &buf);
        assert_eq!(keymap.layers().len(), 2);
        assert_eq!(keymap.get(0, 0, 0).unwrap(), 0x0100);
        assert_eq!(keymap.get(1, 1, 2).unwrap(), 0x010B);
        assert_eq!(keymap.rows(1).unwrap()[0], vec![0x0106, 0x0107, 0x0108]);
    }

    #[test]
    fn test_short_buffer_pads_with_kc_no() {
        let keymap = Keymap::decode(GEOMETRY, &[0x00, 0x04]);
        assert_eq!(keymap.get(0, 0, 0).unwrap(), 0x0004);
        assert_eq!(keymap.get(1, 1, 2).unwrap(), 0);
    }

    #[test]
    fn test_set_and_encode() {
        let mut keymap = Keymap::decode(GEOMETRY, &[]);
        keymap.set(0, 0, 1, 0x5221).unwrap();
        assert!(keymap.set(2, 0, 0, 1).is_err());
        let bytes = Keymap::encode_layer(keymap.layer(0).unwrap());
        assert_eq!(&bytes[..4], &[0x00, 0x00, 0x52, 0x21]);
    }
}
