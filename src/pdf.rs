//! lopdf helpers: object lookups, resource resolution and filter decoding.

use std::io::Read;
use std::path::Path;

use flate2::read::ZlibDecoder;
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};

use crate::geometry::PageBox;
use crate::{ConvertError, Result};

/// Depth limit when walking `/Parent` chains of malformed page trees.
const MAX_INHERITANCE_DEPTH: usize = 32;

/// Image codecs a PDF can declare in a stream's filter chain.
///
/// Bytes encoded with one of these are a complete image in that format, so
/// decoding of the chain stops there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageCodec {
    Dct,
    Jpx,
    CcittFax,
    Jbig2,
}

impl ImageCodec {
    fn from_filter(name: &str) -> Option<Self> {
        match name {
            "DCTDecode" | "DCT" => Some(ImageCodec::Dct),
            "JPXDecode" => Some(ImageCodec::Jpx),
            "CCITTFaxDecode" | "CCF" => Some(ImageCodec::CcittFax),
            "JBIG2Decode" => Some(ImageCodec::Jbig2),
            _ => None,
        }
    }

    /// File extension implied by the codec.
    pub fn extension(self) -> &'static str {
        match self {
            ImageCodec::Dct => "jpg",
            ImageCodec::Jpx => "jp2",
            ImageCodec::CcittFax => "tif",
            ImageCodec::Jbig2 => "jbig2",
        }
    }
}

/// Stream bytes with every non-image filter undone.
#[derive(Debug, Clone)]
pub struct DecodedStream {
    pub data: Vec<u8>,
    /// The image codec still applied to `data`, if the chain ended in one.
    pub codec: Option<ImageCodec>,
}

pub(crate) fn name_of(obj: &Object) -> Option<String> {
    match obj {
        Object::Name(n) => Some(String::from_utf8_lossy(n).to_string()),
        _ => None,
    }
}

pub(crate) fn dict_name(dict: &Dictionary, key: &[u8]) -> Option<String> {
    dict.get(key).ok().and_then(name_of)
}

pub(crate) fn dict_integer(dict: &Dictionary, key: &[u8]) -> Option<i64> {
    dict.get(key).ok().and_then(|v| match v {
        Object::Integer(n) => Some(*n),
        Object::Real(n) => Some(*n as i64),
        _ => None,
    })
}

/// Follow a reference to the object it points at.
pub(crate) fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> Result<&'a Object> {
    match obj {
        Object::Reference(id) => Ok(doc.get_object(*id)?),
        _ => Ok(obj),
    }
}

fn resolve_dict<'a>(doc: &'a Document, obj: &'a Object) -> Result<Option<&'a Dictionary>> {
    match resolve(doc, obj)? {
        Object::Dictionary(d) => Ok(Some(d)),
        Object::Null => Ok(None),
        _ => Err(ConvertError::Malformed("expected a dictionary".to_string())),
    }
}

/// Names of the filters applied to a stream, outermost first.
pub fn filter_chain(doc: &Document, dict: &Dictionary) -> Vec<String> {
    let filter = match dict.get(b"Filter") {
        Ok(f) => f,
        Err(_) => return Vec::new(),
    };
    match resolve(doc, filter) {
        Ok(Object::Name(n)) => vec![String::from_utf8_lossy(n).to_string()],
        Ok(Object::Array(arr)) => arr.iter().filter_map(name_of).collect(),
        _ => Vec::new(),
    }
}

/// Whether the filter chain declares DCT (JPEG) encoding anywhere.
pub fn is_dct_encoded(doc: &Document, dict: &Dictionary) -> bool {
    filter_chain(doc, dict)
        .iter()
        .any(|f| ImageCodec::from_filter(f) == Some(ImageCodec::Dct))
}

/// Undo the non-image filters of a stream.
///
/// Stops at the first image codec, leaving its bytes encoded. Unknown filters
/// are an error since the bytes past them cannot be interpreted.
pub fn decode_stream(doc: &Document, stream: &Stream) -> Result<DecodedStream> {
    let filters = filter_chain(doc, &stream.dict);
    let params = decode_params(doc, &stream.dict, filters.len());
    let mut data = stream.content.clone();

    for (filter, params) in filters.iter().zip(params) {
        if let Some(codec) = ImageCodec::from_filter(filter) {
            return Ok(DecodedStream {
                data,
                codec: Some(codec),
            });
        }
        data = match filter.as_str() {
            "FlateDecode" | "Fl" => {
                let inflated = inflate(&data)?;
                match params {
                    Some(p) => apply_predictor(inflated, &p)?,
                    None => inflated,
                }
            }
            "ASCIIHexDecode" | "AHx" => decode_ascii_hex(&data)?,
            "ASCII85Decode" | "A85" => decode_ascii85(&data)?,
            other => return Err(ConvertError::UnsupportedFilter(other.to_string())),
        };
    }

    Ok(DecodedStream { data, codec: None })
}

fn decode_params(doc: &Document, dict: &Dictionary, count: usize) -> Vec<Option<Dictionary>> {
    let raw = dict
        .get(b"DecodeParms")
        .ok()
        .and_then(|p| resolve(doc, p).ok());
    let mut out: Vec<Option<Dictionary>> = match raw {
        Some(Object::Dictionary(d)) => vec![Some(d.clone())],
        Some(Object::Array(arr)) => arr
            .iter()
            .map(|p| match resolve(doc, p) {
                Ok(Object::Dictionary(d)) => Some(d.clone()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };
    out.resize(count, None);
    out
}

fn inflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut decoded = Vec::new();
    decoder
        .read_to_end(&mut decoded)
        .map_err(|e| ConvertError::ImageDecode(format!("FlateDecode: {}", e)))?;
    Ok(decoded)
}

/// Reverse a TIFF (2) or PNG (10..=15) predictor.
fn apply_predictor(data: Vec<u8>, params: &Dictionary) -> Result<Vec<u8>> {
    let predictor = dict_integer(params, b"Predictor").unwrap_or(1);
    if predictor < 2 {
        return Ok(data);
    }
    let colors = dict_integer(params, b"Colors").unwrap_or(1).max(1) as usize;
    let bpc = dict_integer(params, b"BitsPerComponent").unwrap_or(8).max(1) as usize;
    let columns = dict_integer(params, b"Columns").unwrap_or(1).max(1) as usize;

    let bits_per_pixel = colors
        .checked_mul(bpc)
        .ok_or_else(|| ConvertError::ImageDecode("predictor pixel size overflows".to_string()))?;
    let bytes_per_pixel = bits_per_pixel.div_ceil(8);
    let row_len = bits_per_pixel
        .checked_mul(columns)
        .map(|bits| bits.div_ceil(8))
        .filter(|&len| len <= data.len())
        .ok_or_else(|| {
            ConvertError::ImageDecode(format!(
                "predictor row of {} columns does not fit {} bytes of data",
                columns,
                data.len()
            ))
        })?;

    if predictor == 2 {
        if bpc != 8 {
            return Err(ConvertError::UnsupportedFilter(format!(
                "TIFF predictor with {} bits per component",
                bpc
            )));
        }
        let mut out = data;
        for row in out.chunks_mut(row_len) {
            for i in bytes_per_pixel..row.len() {
                row[i] = row[i].wrapping_add(row[i - bytes_per_pixel]);
            }
        }
        return Ok(out);
    }

    let mut out = Vec::with_capacity(data.len());
    let mut prev = vec![0u8; row_len];
    for chunk in data.chunks(row_len + 1) {
        if chunk.len() < 2 {
            break;
        }
        let tag = chunk[0];
        let mut row = chunk[1..].to_vec();
        row.resize(row_len, 0);
        for i in 0..row_len {
            let left = if i >= bytes_per_pixel {
                row[i - bytes_per_pixel]
            } else {
                0
            };
            let up = prev[i];
            let up_left = if i >= bytes_per_pixel {
                prev[i - bytes_per_pixel]
            } else {
                0
            };
            row[i] = match tag {
                0 => row[i],
                1 => row[i].wrapping_add(left),
                2 => row[i].wrapping_add(up),
                3 => row[i].wrapping_add(((left as u16 + up as u16) / 2) as u8),
                4 => row[i].wrapping_add(paeth(left, up, up_left)),
                other => {
                    return Err(ConvertError::ImageDecode(format!(
                        "invalid PNG predictor row tag {}",
                        other
                    )))
                }
            };
        }
        out.extend_from_slice(&row);
        prev = row;
    }
    Ok(out)
}

fn paeth(a: u8, b: u8, c: u8) -> u8 {
    let p = a as i16 + b as i16 - c as i16;
    let pa = (p - a as i16).abs();
    let pb = (p - b as i16).abs();
    let pc = (p - c as i16).abs();
    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}

fn decode_ascii_hex(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() / 2);
    let mut high: Option<u8> = None;
    for &b in data {
        if b == b'>' {
            break;
        }
        if b.is_ascii_whitespace() {
            continue;
        }
        let nibble = (b as char)
            .to_digit(16)
            .ok_or_else(|| ConvertError::ImageDecode(format!("ASCIIHexDecode: bad byte {:#04x}", b)))?
            as u8;
        match high.take() {
            Some(h) => out.push(h << 4 | nibble),
            None => high = Some(nibble),
        }
    }
    if let Some(h) = high {
        out.push(h << 4);
    }
    Ok(out)
}

fn decode_ascii85(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() * 4 / 5);
    let mut group = [0u8; 5];
    let mut len = 0;

    let body = data.strip_prefix(b"<~").unwrap_or(data);
    for &b in body {
        match b {
            b'~' => break,
            b'z' if len == 0 => out.extend_from_slice(&[0, 0, 0, 0]),
            b'!'..=b'u' => {
                group[len] = b - b'!';
                len += 1;
                if len == 5 {
                    out.extend_from_slice(&ascii85_word(&group).to_be_bytes());
                    len = 0;
                }
            }
            b if b.is_ascii_whitespace() => {}
            other => {
                return Err(ConvertError::ImageDecode(format!(
                    "ASCII85Decode: bad byte {:#04x}",
                    other
                )))
            }
        }
    }
    if len > 1 {
        for slot in group.iter_mut().skip(len) {
            *slot = b'u' - b'!';
        }
        let word = ascii85_word(&group).to_be_bytes();
        out.extend_from_slice(&word[..len - 1]);
    }
    Ok(out)
}

fn ascii85_word(group: &[u8; 5]) -> u32 {
    group
        .iter()
        .fold(0u32, |acc, &d| acc.wrapping_mul(85).wrapping_add(d as u32))
}

/// Resources for a page, following `/Parent` when the page inherits them.
///
/// `Ok(None)` means the page has no resources at all.
pub fn page_resources<'a>(doc: &'a Document, page_id: ObjectId) -> Result<Option<&'a Dictionary>> {
    let mut node = doc.get_dictionary(page_id)?;
    for _ in 0..MAX_INHERITANCE_DEPTH {
        if let Ok(resources) = node.get(b"Resources") {
            return resolve_dict(doc, resources);
        }
        match node.get(b"Parent") {
            Ok(Object::Reference(parent_id)) => node = doc.get_dictionary(*parent_id)?,
            _ => return Ok(None),
        }
    }
    Ok(None)
}

/// Streams in a resource dictionary's `/XObject` entry, in dictionary order.
///
/// Entries that do not resolve to a stream are left out.
pub fn xobject_streams<'a>(
    doc: &'a Document,
    resources: &'a Dictionary,
) -> Result<Vec<(String, &'a Stream)>> {
    let xobjects = match resources.get(b"XObject") {
        Ok(x) => x,
        Err(_) => return Ok(Vec::new()),
    };
    let xobject_dict = match resolve_dict(doc, xobjects)? {
        Some(d) => d,
        None => return Ok(Vec::new()),
    };

    let mut result = Vec::new();
    for (name, value) in xobject_dict.iter() {
        let key = String::from_utf8_lossy(name).to_string();
        match resolve(doc, value) {
            Ok(Object::Stream(stream)) => result.push((key, stream)),
            Ok(_) => tracing::debug!(key = %key, "XObject entry is not a stream"),
            Err(err) => tracing::debug!(key = %key, %err, "XObject entry does not resolve"),
        }
    }
    Ok(result)
}

/// The page's MediaBox, inherited through `/Parent` if needed.
pub fn media_box(doc: &Document, page_id: ObjectId) -> Option<PageBox> {
    let mut node = doc.get_dictionary(page_id).ok()?;
    for _ in 0..MAX_INHERITANCE_DEPTH {
        if let Ok(value) = node.get(b"MediaBox") {
            return match resolve(doc, value).ok()? {
                Object::Array(arr) => PageBox::from_pdf_array(arr),
                _ => None,
            };
        }
        match node.get(b"Parent") {
            Ok(Object::Reference(parent_id)) => node = doc.get_dictionary(*parent_id).ok()?,
            _ => return None,
        }
    }
    None
}

/// Load a PDF from disk, mapping failures to a fatal load error.
pub fn load_document(path: &Path) -> Result<Document> {
    Document::load(path).map_err(|e| ConvertError::Load {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Serialize `doc` fully in memory, then write it out in one go.
///
/// A serialization error never leaves a truncated file behind.
pub fn save_document(doc: &mut Document, path: &Path) -> Result<()> {
    let bytes = document_bytes(doc).map_err(|e| ConvertError::Save {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    std::fs::write(path, bytes).map_err(|e| ConvertError::Save {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

pub fn document_bytes(doc: &mut Document) -> Result<Vec<u8>> {
    let mut output = Vec::new();
    doc.save_to(&mut output)?;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn zlib(data: &[u8]) -> Vec<u8> {
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    fn stream_with_filter(filter: Object, content: Vec<u8>) -> Stream {
        let mut dict = Dictionary::new();
        dict.set("Filter", filter);
        Stream::new(dict, content)
    }

    #[test]
    fn flate_stream_is_inflated() {
        let doc = Document::with_version("1.5");
        let stream = stream_with_filter(Object::Name(b"FlateDecode".to_vec()), zlib(b"pixels"));
        let decoded = decode_stream(&doc, &stream).unwrap();
        assert_eq!(decoded.data, b"pixels");
        assert_eq!(decoded.codec, None);
    }

    #[test]
    fn chain_stops_at_image_codec() {
        let doc = Document::with_version("1.5");
        let jpeg = vec![0xFF, 0xD8, 0xFF, 0xE0, 1, 2, 3];
        let stream = stream_with_filter(
            Object::Array(vec![
                Object::Name(b"FlateDecode".to_vec()),
                Object::Name(b"DCTDecode".to_vec()),
            ]),
            zlib(&jpeg),
        );
        let decoded = decode_stream(&doc, &stream).unwrap();
        assert_eq!(decoded.data, jpeg);
        assert_eq!(decoded.codec, Some(ImageCodec::Dct));
        assert!(is_dct_encoded(&doc, &stream.dict));
    }

    #[test]
    fn unknown_filter_is_rejected() {
        let doc = Document::with_version("1.5");
        let stream = stream_with_filter(Object::Name(b"Crypt".to_vec()), vec![1, 2, 3]);
        assert!(matches!(
            decode_stream(&doc, &stream),
            Err(ConvertError::UnsupportedFilter(f)) if f == "Crypt"
        ));
    }

    #[test]
    fn png_up_predictor_is_reversed() {
        // two rows of 3 gray pixels, second row uses the Up filter
        let filtered = [0u8, 10, 20, 30, 2, 1, 1, 1];
        let mut params = Dictionary::new();
        params.set("Predictor", Object::Integer(12));
        params.set("Columns", Object::Integer(3));
        let out = apply_predictor(filtered.to_vec(), &params).unwrap();
        assert_eq!(out, vec![10, 20, 30, 11, 21, 31]);
    }

    #[test]
    fn oversized_predictor_columns_are_rejected() {
        let mut params = Dictionary::new();
        params.set("Predictor", Object::Integer(15));
        params.set("Colors", Object::Integer(3));
        params.set("Columns", Object::Integer(i64::MAX));
        assert!(matches!(
            apply_predictor(vec![0, 1, 2, 3], &params),
            Err(ConvertError::ImageDecode(_))
        ));

        params.set("Columns", Object::Integer(1_000_000));
        assert!(apply_predictor(vec![0, 1, 2, 3], &params).is_err());
    }

    #[test]
    fn oversized_predictor_stream_is_undecodable() {
        let doc = Document::with_version("1.5");
        let mut params = Dictionary::new();
        params.set("Predictor", Object::Integer(15));
        params.set("Colors", Object::Integer(3));
        params.set("Columns", Object::Integer(i64::MAX));
        let mut stream = stream_with_filter(Object::Name(b"FlateDecode".to_vec()), zlib(&[0; 16]));
        stream.dict.set("DecodeParms", Object::Dictionary(params));
        assert!(decode_stream(&doc, &stream).is_err());
    }

    #[test]
    fn ascii_hex_and_ascii85() {
        assert_eq!(decode_ascii_hex(b"48 65 6C6C 6F>").unwrap(), b"Hello");
        assert_eq!(decode_ascii_hex(b"7>").unwrap(), vec![0x70]);
        assert_eq!(decode_ascii85(b"<~87cURDZ~>").unwrap(), b"Hello");
        assert_eq!(decode_ascii85(b"z~>").unwrap(), vec![0, 0, 0, 0]);
    }

    #[test]
    fn codec_extensions() {
        assert_eq!(ImageCodec::Dct.extension(), "jpg");
        assert_eq!(ImageCodec::Jpx.extension(), "jp2");
        assert_eq!(ImageCodec::CcittFax.extension(), "tif");
        assert_eq!(ImageCodec::Jbig2.extension(), "jbig2");
    }
}
