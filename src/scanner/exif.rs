use photo_story_common::GeoLocation;
use std::io::Cursor;

/// 写真から読み取れた撮影情報
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhotoMeta {
    pub taken_at: Option<String>,
    pub location: Option<GeoLocation>,
}

pub fn extract_meta(bytes: &[u8]) -> Option<PhotoMeta> {
    let exif = exif::Reader::new()
        .read_from_container(&mut Cursor::new(bytes))
        .ok()?;

    // DateTimeOriginal → DateTime の順に探す
    let taken_at = [exif::Tag::DateTimeOriginal, exif::Tag::DateTime]
        .iter()
        .find_map(|tag| exif.get_field(*tag, exif::In::PRIMARY))
        .map(|field| field.display_value().to_string());

    let location = read_coordinate(&exif, exif::Tag::GPSLatitude, exif::Tag::GPSLatitudeRef)
        .zip(read_coordinate(&exif, exif::Tag::GPSLongitude, exif::Tag::GPSLongitudeRef))
        .map(|(latitude, longitude)| GeoLocation {
            latitude,
            longitude,
        });

    Some(PhotoMeta { taken_at, location })
}

fn read_coordinate(exif: &exif::Exif, tag: exif::Tag, ref_tag: exif::Tag) -> Option<f64> {
    let field = exif.get_field(tag, exif::In::PRIMARY)?;
    let exif::Value::Rational(ref parts) = field.value else {
        return None;
    };
    let dms: Vec<f64> = parts.iter().map(|r| r.to_f64()).collect();
    let reference = exif
        .get_field(ref_tag, exif::In::PRIMARY)
        .map(|f| f.display_value().to_string())
        .unwrap_or_default();
    dms_to_decimal(&dms, &reference)
}

/// 度分秒 → 十進度（南緯・西経は負）
fn dms_to_decimal(dms: &[f64], reference: &str) -> Option<f64> {
    let degrees = *dms.first()?;
    let minutes = dms.get(1).copied().unwrap_or(0.0);
    let seconds = dms.get(2).copied().unwrap_or(0.0);
    let value = degrees + minutes / 60.0 + seconds / 3600.0;

    if !value.is_finite() {
        return None;
    }
    let negative = matches!(reference.trim().trim_matches('"'), "S" | "W");
    Some(if negative { -value } else { value })
}
