/// Parsed view over a single ISOBMFF box inside a parent byte range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BoxView {
    pub(crate) end: usize,
    pub(crate) fourcc: [u8; 4],
    pub(crate) body_start: usize,
}

/// Where a box header lands relative to the bytes available so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BoxHeader {
    /// `(total_box_size, fourcc, header_size)`; the size is `None` for a box
    /// that extends to the end of the file.
    Parsed(Option<u64>, [u8; 4], usize),
    /// Not enough bytes to read the header yet.
    Truncated,
}

/// Read a box header.
///
/// Handles 32-bit size, 64-bit extended size (`size == 1`),
/// and box-extends-to-EOF (`size == 0`).
pub(crate) fn read_box_header(data: &[u8]) -> BoxHeader {
    if data.len() < 8 {
        return BoxHeader::Truncated;
    }

    let size = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as u64;
    let fourcc: [u8; 4] = [data[4], data[5], data[6], data[7]];

    if size == 1 {
        if data.len() < 16 {
            return BoxHeader::Truncated;
        }
        let ext_size = u64::from_be_bytes([
            data[8], data[9], data[10], data[11], data[12], data[13], data[14], data[15],
        ]);
        BoxHeader::Parsed(Some(ext_size), fourcc, 16)
    } else if size == 0 {
        BoxHeader::Parsed(None, fourcc, 8)
    } else {
        BoxHeader::Parsed(Some(size), fourcc, 8)
    }
}

/// Parse a single box located at `offset` within `[0..end)`.
///
/// Returns `None` if the header is truncated, malformed, or the box does not
/// fit inside the range.
pub(crate) fn box_at(data: &[u8], offset: usize, end: usize) -> Option<BoxView> {
    if offset >= end {
        return None;
    }

    let BoxHeader::Parsed(size, fourcc, header_size) = read_box_header(&data[offset..end]) else {
        return None;
    };
    let size = match size {
        Some(size) => usize::try_from(size).ok()?,
        None => end - offset,
    };

    if size < header_size || offset.checked_add(size)? > end {
        return None;
    }

    Some(BoxView {
        end: offset + size,
        fourcc,
        body_start: offset + header_size,
    })
}

/// Find the first child box with the given FourCC inside `[start..end)`.
pub(crate) fn find_first_box(
    data: &[u8],
    start: usize,
    end: usize,
    target: [u8; 4],
) -> Option<BoxView> {
    let mut offset = start;
    while offset < end {
        let parsed = box_at(data, offset, end)?;
        if parsed.fourcc == target {
            return Some(parsed);
        }

        offset = parsed.end;
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::make_box;

    #[test]
    fn test_truncated_header() {
        assert_eq!(read_box_header(&[0, 0, 0]), BoxHeader::Truncated);
        // 64-bit size announced but not present yet.
        assert_eq!(
            read_box_header(&[0, 0, 0, 1, b'm', b'd', b'a', b't', 0]),
            BoxHeader::Truncated
        );
    }

    #[test]
    fn test_find_nested_child() {
        let mut body = make_box(b"free", &[0; 4]);
        body.extend(make_box(b"mvhd", &[1, 2, 3]));
        let moov = make_box(b"moov", &body);

        let outer = box_at(&moov, 0, moov.len()).unwrap();
        assert_eq!(&outer.fourcc, b"moov");
        let mvhd = find_first_box(&moov, outer.body_start, outer.end, *b"mvhd").unwrap();
        assert_eq!(&moov[mvhd.body_start..mvhd.end], &[1, 2, 3]);
    }

    #[test]
    fn test_box_larger_than_range() {
        let mut data = make_box(b"moov", &[0; 16]);
        data.truncate(12);
        assert_eq!(box_at(&data, 0, data.len()), None);
    }
}
