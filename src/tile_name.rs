//! Positional decoding of change-detection layer names.
//!
//! Layer names carry the Landsat path/row and the pre/post image dates at
//! fixed character offsets, e.g. `LS_p095r078_20210101_20210315_change.shp`.
//! The offsets live in a [`NameSchema`] so that producers using a different
//! layout can be described instead of re-parsed by hand.
use crate::error::{Error, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;

const DATE_FORMAT: &str = "%Y%m%d";
const DATE_WIDTH: usize = 8;

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Field {
    pub offset: usize,
    pub width: usize,
}

impl Field {
    pub const fn new(offset: usize, width: usize) -> Self {
        Self { offset, width }
    }

    fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.width
    }

    fn slice<'a>(&self, label: &str, name: &'a str) -> Result<&'a str> {
        let range = self.range();
        if name.len() < range.end {
            return Err(Error::format(
                name,
                format!(
                    "{label} needs characters {}..{} but the name is only {} long",
                    range.start,
                    range.end,
                    name.len()
                ),
            ));
        }
        name.get(range.clone()).ok_or_else(|| {
            Error::format(
                name,
                format!("{label} at {}..{} is not ASCII", range.start, range.end),
            )
        })
    }

    fn digits<'a>(&self, label: &str, name: &'a str) -> Result<&'a str> {
        let value = self.slice(label, name)?;
        if !value.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::format(
                name,
                format!("{label} '{value}' is not numeric"),
            ));
        }
        Ok(value)
    }
}

/// Character layout of a layer name.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct NameSchema {
    pub path: Field,
    pub row: Field,
    pub pre_date: Field,
    pub post_date: Field,
}

impl Default for NameSchema {
    /// `LS_pPPPrRRR_YYYYMMDD_YYYYMMDD_*`
    fn default() -> Self {
        Self {
            path: Field::new(4, 3),
            row: Field::new(8, 3),
            pre_date: Field::new(12, DATE_WIDTH),
            post_date: Field::new(21, DATE_WIDTH),
        }
    }
}

impl NameSchema {
    /// Layout of the Queensland Remote Sensing Centre change layers, where the
    /// two dates are written back to back.
    pub fn nvms() -> Self {
        Self {
            path: Field::new(8, 3),
            row: Field::new(12, 3),
            pre_date: Field::new(17, DATE_WIDTH),
            post_date: Field::new(25, DATE_WIDTH),
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (label, field) in [("path", self.path), ("row", self.row)] {
            if field.width == 0 || field.width > 4 {
                return Err(Error::Config(format!(
                    "{label} width must be between 1 and 4, got {}",
                    field.width
                )));
            }
        }
        for (label, field) in [("pre_date", self.pre_date), ("post_date", self.post_date)] {
            if field.width != DATE_WIDTH {
                return Err(Error::Config(format!(
                    "{label} width must be {DATE_WIDTH}, got {}",
                    field.width
                )));
            }
        }
        Ok(())
    }

    pub fn decode(&self, name: &str) -> Result<TileName> {
        self.validate()?;
        let path = self.path.digits("path", name)?;
        let row = self.row.digits("row", name)?;
        let pre = parse_date("pre-change date", self.pre_date.slice("pre-change date", name)?, name)?;
        let post = parse_date(
            "post-change date",
            self.post_date.slice("post-change date", name)?,
            name,
        )?;

        Ok(TileName {
            tile: TileId {
                path: parse_number(path, name)?,
                row: parse_number(row, name)?,
                path_width: self.path.width,
                row_width: self.row.width,
            },
            dates: [pre, post],
        })
    }
}

fn parse_number(digits: &str, name: &str) -> Result<u32> {
    digits
        .parse()
        .map_err(|e| Error::format(name, format!("'{digits}': {e}")))
}

fn parse_date(label: &str, value: &str, name: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .map_err(|e| Error::format(name, format!("{label} '{value}' is not a calendar date: {e}")))
}

/// A WRS-2 path/row pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TileId {
    path: u32,
    row: u32,
    path_width: usize,
    row_width: usize,
}

impl TileId {
    pub fn new(path: u32, row: u32) -> Self {
        Self {
            path,
            row,
            path_width: 3,
            row_width: 3,
        }
    }

    pub fn path(&self) -> u32 {
        self.path
    }

    pub fn row(&self) -> u32 {
        self.row
    }

    /// The integer key used by the reference table: path digits followed by
    /// row digits, e.g. 095 and 078 give 95078. Widths are at most 4 digits,
    /// so the key fits in a `u32`.
    pub fn value(&self) -> u32 {
        self.path * 10u32.pow(self.row_width as u32) + self.row
    }

    pub fn path_str(&self) -> String {
        format!("{:0width$}", self.path, width = self.path_width)
    }

    pub fn row_str(&self) -> String {
        format!("{:0width$}", self.row, width = self.row_width)
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}

/// Everything a layer name tells us.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TileName {
    pub tile: TileId,
    /// Pre-change then post-change.
    pub dates: [NaiveDate; 2],
}

impl TileName {
    pub fn pre_date(&self) -> NaiveDate {
        self.dates[0]
    }

    pub fn post_date(&self) -> NaiveDate {
        self.dates[1]
    }

    pub fn date_str(date: NaiveDate) -> String {
        date.format(DATE_FORMAT).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NAME: &str = "LS_p095r078_20210101_20210315_change.shp";

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_decode_default_layout() {
        let decoded = NameSchema::default().decode(NAME).unwrap();
        assert_eq!(decoded.tile.value(), 95078);
        assert_eq!(decoded.pre_date(), date(2021, 1, 1));
        assert_eq!(decoded.post_date(), date(2021, 3, 15));
    }

    #[test]
    fn test_fields_reencode_to_name_substrings() {
        let cases = [
            (NameSchema::default(), "LS_p095r078_20210101_20210315_change.shp"),
            (NameSchema::default(), "LS_p001r009_19991231_20000229_change.shp"),
            (NameSchema::default(), "LS_p100r070_20240229_20241001_chg"),
            (NameSchema::nvms(), "cvmsre_p095r078_e2021010120210315_chg.shp"),
            (NameSchema::nvms(), "cvmsre_p009r001_e2013041120131203_chg.shp"),
        ];
        for (schema, name) in cases {
            let decoded = schema.decode(name).unwrap();
            let substring = |field: Field| &name[field.offset..field.offset + field.width];
            assert_eq!(decoded.tile.path_str(), substring(schema.path), "{name}");
            assert_eq!(decoded.tile.row_str(), substring(schema.row), "{name}");
            assert_eq!(
                TileName::date_str(decoded.pre_date()),
                substring(schema.pre_date),
                "{name}"
            );
            assert_eq!(
                TileName::date_str(decoded.post_date()),
                substring(schema.post_date),
                "{name}"
            );
            let key = format!("{}{}", decoded.tile.path_str(), decoded.tile.row_str());
            assert_eq!(decoded.tile.value(), key.parse::<u32>().unwrap(), "{name}");
        }
    }

    #[test]
    fn test_leading_zeros_are_kept() {
        let decoded = NameSchema::default()
            .decode("LS_p001r009_19991231_20000229_change.shp")
            .unwrap();
        assert_eq!(decoded.tile.path(), 1);
        assert_eq!(decoded.tile.row(), 9);
        assert_eq!(decoded.tile.value(), 1009);
        assert_eq!(decoded.tile.to_string(), "1009");
        assert_eq!(decoded.dates, [date(1999, 12, 31), date(2000, 2, 29)]);
    }

    #[test]
    fn test_decode_rejects_invalid_schema() {
        let mut schema = NameSchema::default();
        schema.row.width = 10;
        let err = schema
            .decode("LS_p095r0780000000_20210101_20210315_change.shp")
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_decode_nvms_layout() {
        let name = "cvmsre_p095r078_e2021010120210315_chg.shp";
        let schema = NameSchema::nvms();
        let decoded = schema.decode(name).unwrap();
        assert_eq!(decoded.tile.value(), 95078);
        assert_eq!(decoded.tile.path_str(), "095");
        assert_eq!(decoded.tile.row_str(), "078");
        assert_eq!(decoded.dates, [date(2021, 1, 1), date(2021, 3, 15)]);
    }

    #[test]
    fn test_short_name_is_rejected() {
        let err = NameSchema::default().decode("LS_p095r078_2021").unwrap_err();
        assert!(matches!(err, Error::Format { .. }));
        assert!(err.to_string().contains("pre-change date"));
    }

    #[test]
    fn test_invalid_calendar_date_is_rejected() {
        let err = NameSchema::default()
            .decode("LS_p095r078_20210230_20210315_change.shp")
            .unwrap_err();
        assert!(matches!(err, Error::Format { .. }));
    }

    #[test]
    fn test_non_numeric_path_is_rejected() {
        let err = NameSchema::default()
            .decode("LS_pA95r078_20210101_20210315_change.shp")
            .unwrap_err();
        assert!(err.to_string().contains("path 'A95'"));
    }

    #[test]
    fn test_validate_rejects_short_date_field() {
        let mut schema = NameSchema::default();
        schema.post_date.width = 6;
        assert!(matches!(schema.validate(), Err(Error::Config(_))));
        assert!(NameSchema::nvms().validate().is_ok());
    }
}
