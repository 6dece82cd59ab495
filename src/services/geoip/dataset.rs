//! 区间数据集加载
//!
//! 数据集为无表头的分隔文本，每行一个区间：
//! `lower, upper, continent, country, region, city, latitude, longitude`
//!
//! 容错策略：
//! - 字段数不足的行直接跳过
//! - 地址无法解析的行跳过（行级错误）
//! - 文本字段中的非法 UTF-8 字节按替换字符解码，不影响整行
//! - 经纬度无法解析视为数据集损坏，加载失败

use std::borrow::Cow;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::time::Instant;

use csv::{ByteRecord, ReaderBuilder};
use tracing::{debug, info};

use super::codec::{self, AddressFamily};
use super::range_table::{AddressRange, LoadError, Location, RangeTable};

/// 每行所需的最少字段数
pub const REQUIRED_FIELDS: usize = 8;

/// 加载统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadSummary {
    /// 读取的总行数
    pub rows: u64,
    /// 字段数不足而跳过的行
    pub skipped_short: u64,
    /// 地址无法解析而跳过的行
    pub skipped_address: u64,
}

impl LoadSummary {
    pub fn skipped(&self) -> u64 {
        self.skipped_short + self.skipped_address
    }
}

enum RowOutcome {
    Range(AddressRange),
    TooShort,
    BadAddress,
}

/// 数据集加载器
#[derive(Debug, Clone)]
pub struct DatasetLoader {
    /// 进度日志间隔（百分比，0 表示关闭）
    progress_step_percent: u8,
}

impl Default for DatasetLoader {
    fn default() -> Self {
        Self {
            progress_step_percent: 10,
        }
    }
}

impl DatasetLoader {
    pub fn new(progress_step_percent: u8) -> Self {
        Self {
            progress_step_percent: progress_step_percent.min(100),
        }
    }

    /// 从文件加载
    pub fn load_path<P: AsRef<Path>>(
        &self,
        path: P,
    ) -> Result<(RangeTable, LoadSummary), LoadError> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let total_bytes = file.metadata().ok().map(|m| m.len());
        info!("Loading IP range dataset from {}", path.display());
        self.load_reader(BufReader::new(file), total_bytes)
    }

    /// 从任意 reader 加载
    ///
    /// `total_bytes` 仅用于进度日志
    pub fn load_reader<R: Read>(
        &self,
        reader: R,
        total_bytes: Option<u64>,
    ) -> Result<(RangeTable, LoadSummary), LoadError> {
        let start = Instant::now();
        let mut csv_reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(reader);

        let mut summary = LoadSummary::default();
        let mut ranges = Vec::new();
        let mut record = ByteRecord::new();
        let mut progress = Progress::new(total_bytes, self.progress_step_percent);

        while csv_reader.read_byte_record(&mut record)? {
            summary.rows += 1;
            match parse_row(&record, summary.rows)? {
                RowOutcome::Range(range) => ranges.push(range),
                RowOutcome::TooShort => summary.skipped_short += 1,
                RowOutcome::BadAddress => summary.skipped_address += 1,
            }
            progress.observe(csv_reader.position().byte());
        }

        let table = RangeTable::from_ranges(ranges)?;

        info!(
            "IP range dataset loaded: {} IPv4 ranges, {} IPv6 ranges, {} rows skipped ({:.2?})",
            table.family_len(AddressFamily::V4),
            table.family_len(AddressFamily::V6),
            summary.skipped(),
            start.elapsed()
        );
        debug!(
            "Dataset rows: {} total, {} too short, {} with bad addresses",
            summary.rows, summary.skipped_short, summary.skipped_address
        );

        Ok((table, summary))
    }
}

/// 按 UTF-8 解码字段（非法字节替换为 U+FFFD）并去除两端的引号
#[inline]
fn text_field(record: &ByteRecord, index: usize) -> Cow<'_, str> {
    match String::from_utf8_lossy(&record[index]) {
        Cow::Borrowed(text) => Cow::Borrowed(text.trim_matches('"')),
        Cow::Owned(text) => Cow::Owned(text.trim_matches('"').to_string()),
    }
}

fn parse_row(record: &ByteRecord, row: u64) -> Result<RowOutcome, LoadError> {
    if record.len() < REQUIRED_FIELDS {
        return Ok(RowOutcome::TooShort);
    }

    let lower_text = text_field(record, 0);
    let upper_text = text_field(record, 1);
    let (lower_text, upper_text) = (lower_text.as_ref(), upper_text.as_ref());

    // 地址族以下界为准，上界必须同族
    let Ok((family, lower)) = codec::parse(lower_text) else {
        debug!("Row {}: unparseable lower address {:?}", row, lower_text);
        return Ok(RowOutcome::BadAddress);
    };
    let upper = match codec::parse(upper_text) {
        Ok((upper_family, upper)) if upper_family == family => upper,
        _ => {
            debug!("Row {}: unparseable upper address {:?}", row, upper_text);
            return Ok(RowOutcome::BadAddress);
        }
    };

    let location = Location {
        continent: text_field(record, 2).into_owned(),
        country: text_field(record, 3).into_owned(),
        region: text_field(record, 4).into_owned(),
        city: text_field(record, 5).into_owned(),
        latitude: parse_coordinate(&text_field(record, 6), row)?,
        longitude: parse_coordinate(&text_field(record, 7), row)?,
    };

    Ok(RowOutcome::Range(AddressRange {
        family,
        lower,
        upper,
        location,
    }))
}

fn parse_coordinate(field: &str, row: u64) -> Result<f64, LoadError> {
    field.parse::<f64>().map_err(|_| LoadError::Coordinate {
        row,
        value: field.to_string(),
    })
}

/// 按字节位置输出加载进度
struct Progress {
    total_bytes: Option<u64>,
    step: u64,
    next_mark: u64,
}

impl Progress {
    fn new(total_bytes: Option<u64>, step: u8) -> Self {
        let step = step as u64;
        Self {
            total_bytes: total_bytes.filter(|t| *t > 0 && step > 0),
            step,
            next_mark: step,
        }
    }

    #[inline]
    fn observe(&mut self, position: u64) {
        let Some(total) = self.total_bytes else {
            return;
        };
        let percent = position.saturating_mul(100) / total;
        if percent >= self.next_mark && self.next_mark <= 100 {
            info!("Dataset load progress: {}%", percent.min(100));
            while self.next_mark <= percent {
                self.next_mark += self.step;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(text: &str) -> Result<(RangeTable, LoadSummary), LoadError> {
        DatasetLoader::new(0).load_reader(text.as_bytes(), None)
    }

    #[test]
    fn test_quoted_fields_are_unquoted() {
        let (table, summary) =
            load("1.2.3.0,1.2.3.255,\"EU\",\"FR\",\"Ile-de-France\",\"Paris\",48.85,2.35\n")
                .unwrap();

        assert_eq!(summary.rows, 1);
        let (family, value) = codec::parse("1.2.3.42").unwrap();
        let location = table.lookup(family, value).unwrap();
        assert_eq!(location.continent, "EU");
        assert_eq!(location.region, "Ile-de-France");
        assert_eq!(location.city, "Paris");
    }

    #[test]
    fn test_embedded_separator_inside_quotes() {
        let (table, _) = load("1.0.0.0,1.0.0.255,NA,US,\"Washington, D.C.\",\"Washington\",38.9,-77.0\n")
            .unwrap();
        let (family, value) = codec::parse("1.0.0.1").unwrap();
        assert_eq!(
            table.lookup(family, value).unwrap().region,
            "Washington, D.C."
        );
    }

    #[test]
    fn test_short_rows_skipped() {
        let (table, summary) = load(
            "1.0.0.0,1.0.0.255,EU\n\
             2.0.0.0,2.0.0.255,EU,DE,BE,Berlin,52.5,13.4\n",
        )
        .unwrap();

        assert_eq!(table.len(), 1);
        assert_eq!(summary.skipped_short, 1);
    }

    #[test]
    fn test_invalid_utf8_in_text_field_keeps_the_row() {
        let mut data = b"1.0.0.0,1.0.0.255,EU,DE,BE,Berlin,52.5,13.4\n".to_vec();
        data.extend_from_slice(b"2.0.0.0,2.0.0.255,EU,DE,BY,M\xff\xfenchen,48.1,11.6\n");
        data.extend_from_slice(b"3.0.0.0,3.0.0.255,EU,FR,IDF,Paris,48.85,2.35\n");

        let (table, summary) = DatasetLoader::new(0)
            .load_reader(data.as_slice(), None)
            .unwrap();

        assert_eq!(summary.rows, 3);
        assert_eq!(summary.skipped(), 0);
        assert_eq!(table.len(), 3);
        let (family, value) = codec::parse("2.0.0.7").unwrap();
        let location = table.lookup(family, value).unwrap();
        assert_eq!(location.city, "M\u{FFFD}\u{FFFD}nchen");
        assert_eq!(location.latitude, 48.1);
    }

    #[test]
    fn test_invalid_utf8_in_address_skips_the_row() {
        let mut data = b"1.0.0.\xff,1.0.0.255,EU,DE,BE,Berlin,52.5,13.4\n".to_vec();
        data.extend_from_slice(b"3.0.0.0,3.0.0.255,EU,FR,IDF,Paris,48.85,2.35\n");

        let (table, summary) = DatasetLoader::new(0)
            .load_reader(data.as_slice(), None)
            .unwrap();

        assert_eq!(summary.skipped_address, 1);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_bad_address_rows_skipped() {
        let (table, summary) = load(
            "bogus,1.0.0.255,EU,DE,BE,Berlin,52.5,13.4\n\
             1.0.0.0,2001:db8::,EU,DE,BE,Berlin,52.5,13.4\n\
             2001:db8::,2001:db8::ffff,EU,DE,BE,Berlin,52.5,13.4\n",
        )
        .unwrap();

        assert_eq!(summary.skipped_address, 2);
        assert_eq!(table.family_len(AddressFamily::V6), 1);
    }

    #[test]
    fn test_bad_coordinate_is_fatal() {
        let err = load(
            "1.0.0.0,1.0.0.255,EU,DE,BE,Berlin,52.5,13.4\n\
             2.0.0.0,2.0.0.255,EU,DE,BE,Berlin,north,13.4\n",
        )
        .unwrap_err();

        match err {
            LoadError::Coordinate { row, value } => {
                assert_eq!(row, 2);
                assert_eq!(value, "north");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_overlapping_rows_are_fatal() {
        let result = load(
            "1.0.0.0,1.0.0.255,EU,DE,BE,Berlin,52.5,13.4\n\
             1.0.0.100,1.0.1.0,EU,DE,BE,Berlin,52.5,13.4\n",
        );
        assert!(matches!(result, Err(LoadError::Overlap { .. })));
    }

    #[test]
    fn test_progress_marks_advance() {
        let mut progress = Progress::new(Some(1000), 10);
        progress.observe(50);
        assert_eq!(progress.next_mark, 10);
        progress.observe(350);
        assert_eq!(progress.next_mark, 40);
        progress.observe(1000);
        assert_eq!(progress.next_mark, 110);
    }
}
