/// Decoder for Google encoded polylines: each coordinate delta is zig-zag
/// encoded and emitted as 5-bit chunks with a continuation bit, offset by 63.
/// Precision is 1e-5 degrees.
pub fn decode(encoded: &str) -> Vec<(f64, f64)> {
    let bytes = encoded.as_bytes();
    let mut points = Vec::new();
    let mut index = 0usize;
    let mut lat: i64 = 0;
    let mut lon: i64 = 0;

    while index < bytes.len() {
        let (dlat, next) = match decode_value(bytes, index) {
            Some(pair) => pair,
            None => break,
        };
        index = next;
        let (dlon, next) = match decode_value(bytes, index) {
            Some(pair) => pair,
            None => break,
        };
        index = next;

        lat += dlat;
        lon += dlon;
        points.push((lat as f64 * 1e-5, lon as f64 * 1e-5));
    }

    points
}

fn decode_value(bytes: &[u8], mut index: usize) -> Option<(i64, usize)> {
    let mut result: i64 = 0;
    let mut shift = 0u32;

    loop {
        let byte = *bytes.get(index)? as i64 - 63;
        if byte < 0 {
            return None;
        }
        index += 1;
        result |= (byte & 0x1f) << shift;
        shift += 5;
        if byte < 0x20 {
            break;
        }
    }

    // Undo the zig-zag encoding.
    let value = if result & 1 != 0 {
        !(result >> 1)
    } else {
        result >> 1
    };
    Some((value, index))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_reference_polyline() {
        let points = decode("_p~iF~ps|U_ulLnnqC_mqNvxq`@");
        let expected = [(38.5, -120.2), (40.7, -120.95), (43.252, -126.453)];
        assert_eq!(points.len(), expected.len());
        for (got, want) in points.iter().zip(expected.iter()) {
            assert!((got.0 - want.0).abs() < 1e-5, "lat {} vs {}", got.0, want.0);
            assert!((got.1 - want.1).abs() < 1e-5, "lon {} vs {}", got.1, want.1);
        }
    }

    #[test]
    fn empty_input_decodes_to_nothing() {
        assert!(decode("").is_empty());
    }

    #[test]
    fn truncated_input_drops_partial_point() {
        // The reference polyline cut mid-coordinate should not panic and
        // should only yield fully decoded points.
        let points = decode("_p~iF~ps|U_ulL");
        assert_eq!(points.len(), 1);
    }
}
