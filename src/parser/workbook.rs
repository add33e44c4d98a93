//! Sheet Profiler
//!
//! calamineを使用してワークブックを開き、シートごとに型付きテーブルへ変換し、
//! 列プロファイルを付与する。

use std::borrow::Cow;
use std::io::Cursor;

use calamine::{
    open_workbook_auto_from_rs, Data, ExcelDateTime, ExcelDateTimeType, Range, Reader,
};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use tracing::{debug, info};

use crate::builder::ProcessingConfig;
use crate::error::XlsxDigestError;
use crate::parser::decrypt::open_encrypted_container;
use crate::parser::profile::profile_table;
use crate::security::SecurityConfig;
use crate::stage::Stage;
use crate::types::{CellValue, ParsedWorkbook, Table};

/// Excelのシリアル値の上限（9999-12-31）
const MAX_EXCEL_SERIAL: f64 = 2_958_466.0;

/// 1904年システムと1900年システムのシリアル値の差（日数）
const EXCEL_1904_OFFSET: f64 = 1462.0;

/// 解析ステージの入力
#[derive(Debug, Clone)]
pub struct WorkbookSource {
    /// ワークブックのバイト列
    pub bytes: Vec<u8>,
    /// 暗号化されたワークブックのパスワード
    pub credentials: Option<String>,
}

impl WorkbookSource {
    /// 平文のワークブックから入力を生成
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            credentials: None,
        }
    }

    /// パスワードを指定
    pub fn with_credentials(mut self, password: impl Into<String>) -> Self {
        self.credentials = Some(password.into());
        self
    }
}

/// シートプロファイラー
///
/// ワークブックを解析し、シートごとの`ProfiledTable`を生成します。
/// プロセス全体で共有される可変状態は持たないため、
/// 複数のリクエストから同時に使用できます。
///
/// # 使用例
///
/// ```rust,no_run
/// use xlsxdigest::{ProcessingConfigBuilder, SheetProfiler};
///
/// # fn main() -> Result<(), xlsxdigest::XlsxDigestError> {
/// let config = ProcessingConfigBuilder::new()
///     .with_include_sheets(vec!["Sales_Data".to_string()])
///     .build()?;
/// let bytes = std::fs::read("sample_data.xlsx")?;
/// let workbook = SheetProfiler::new(&config).parse(&bytes, None)?;
/// for sheet in workbook.iter() {
///     println!("{}: {:?}", sheet.table.name, sheet.table.shape());
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct SheetProfiler<'a> {
    config: &'a ProcessingConfig,
    security: SecurityConfig,
}

impl<'a> SheetProfiler<'a> {
    /// 新しいSheetProfilerを生成
    pub fn new(config: &'a ProcessingConfig) -> Self {
        Self {
            config,
            security: SecurityConfig::default(),
        }
    }

    /// ワークブックを解析し、シートごとのプロファイル済みテーブルを返す
    ///
    /// # 引数
    ///
    /// * `workbook_bytes` - ワークブックのバイト列
    /// * `credentials` - 暗号化されたワークブックのパスワード（平文の場合は無視）
    ///
    /// # 戻り値
    ///
    /// * `Ok(ParsedWorkbook)` - `include_sheets`に従って選択されたシート
    ///   （ワークブックに存在しない名前は黙って除外）
    /// * `Err(XlsxDigestError)` - ワークブックを開けない、復号できない、
    ///   またはシートを解読できない場合（部分的な結果は返さない）
    pub fn parse(
        &self,
        workbook_bytes: &[u8],
        credentials: Option<&str>,
    ) -> Result<ParsedWorkbook, XlsxDigestError> {
        // 1. セキュリティチェック: 入力ファイルサイズの上限
        self.security.check_input_size(workbook_bytes.len() as u64)?;

        // 2. 暗号化コンテナであれば復号
        let bytes: Cow<'_, [u8]> = match open_encrypted_container(workbook_bytes)? {
            Some(container) => {
                let password = credentials.ok_or_else(|| {
                    XlsxDigestError::Decryption(
                        "workbook is password-protected but no password was supplied".to_string(),
                    )
                })?;
                Cow::Owned(container.decrypt(password, &self.security)?)
            }
            None => {
                if credentials.is_some() {
                    debug!("Workbook is not encrypted; ignoring supplied credentials");
                }
                Cow::Borrowed(workbook_bytes)
            }
        };

        // 3. calamineでワークブックを開く（xlsx/xlsm/xlsb/xls/ods）
        let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.as_ref()))?;

        // 4. シート選択
        let available = workbook.sheet_names().to_vec();
        let selected = select_sheets(&available, self.config.include_sheets());

        // 5. 各シートをテーブル化してプロファイル
        let mut sheets = Vec::with_capacity(selected.len());
        for sheet_name in selected {
            let range = workbook.worksheet_range(&sheet_name)?;
            let table = range_to_table(&sheet_name, &range);
            debug!(
                sheet = %sheet_name,
                rows = table.row_count(),
                columns = table.column_count(),
                "Profiled sheet"
            );
            sheets.push(profile_table(table));
        }

        info!(sheets = sheets.len(), "Parsed workbook");
        Ok(ParsedWorkbook::new(sheets))
    }
}

impl Stage for SheetProfiler<'_> {
    type Input = WorkbookSource;
    type Output = ParsedWorkbook;

    fn execute(&self, input: WorkbookSource) -> Result<ParsedWorkbook, XlsxDigestError> {
        self.parse(&input.bytes, input.credentials.as_deref())
    }
}

/// シートフィルタを適用
///
/// フィルタが空ならワークブックの全シートをその順序で返します。
/// 指定がある場合はフィルタの順序に従い、存在しない名前と重複は除外します。
fn select_sheets(available: &[String], filter: &[String]) -> Vec<String> {
    if filter.is_empty() {
        return available.to_vec();
    }

    let mut selected: Vec<String> = Vec::with_capacity(filter.len());
    for name in filter {
        if selected.contains(name) {
            continue;
        }
        if available.contains(name) {
            selected.push(name.clone());
        } else {
            debug!(sheet = %name, "Requested sheet not found in workbook; skipping");
        }
    }
    selected
}

/// 使用範囲の先頭行をヘッダーとしてテーブルを構築
fn range_to_table(name: &str, range: &Range<Data>) -> Table {
    let mut rows = range.rows();
    let header = match rows.next() {
        Some(header) => header,
        None => return Table::new(name, Vec::new(), Vec::new()),
    };

    let columns = header_names(header);
    let width = columns.len();
    let records = rows
        .map(|row| {
            (0..width)
                .map(|idx| row.get(idx).map(convert_cell).unwrap_or(CellValue::Null))
                .collect()
        })
        .collect();

    Table::new(name, columns, records)
}

/// ヘッダー行から列名を生成
///
/// 空のヘッダーは`Unnamed: <index>`、重複する名前には`.1`, `.2`…を付与します。
fn header_names(header: &[Data]) -> Vec<String> {
    let mut names: Vec<String> = Vec::with_capacity(header.len());

    for (idx, cell) in header.iter().enumerate() {
        let base = convert_cell(cell)
            .to_text()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| format!("Unnamed: {}", idx));

        let mut candidate = base.clone();
        let mut suffix = 1;
        while names.contains(&candidate) {
            candidate = format!("{}.{}", base, suffix);
            suffix += 1;
        }
        names.push(candidate);
    }

    names
}

/// calamineのセル値を変換
fn convert_cell(cell: &Data) -> CellValue {
    match cell {
        Data::Int(i) => CellValue::Number(*i as f64),
        Data::Float(f) => CellValue::Number(*f),
        Data::String(s) if s.is_empty() => CellValue::Null,
        Data::String(s) => CellValue::Text(s.clone()),
        Data::Bool(b) => CellValue::Bool(*b),
        Data::DateTime(dt) => {
            let serial = dt.as_f64();
            if dt.is_datetime() {
                serial_to_datetime(serial_in_1900_system(dt))
                    .map(CellValue::DateTime)
                    .unwrap_or(CellValue::Number(serial))
            } else {
                // 経過時間は日数として扱う
                CellValue::Number(serial)
            }
        }
        Data::DateTimeIso(s) => parse_iso_datetime(s)
            .map(CellValue::DateTime)
            .unwrap_or_else(|| CellValue::Text(s.clone())),
        Data::DurationIso(s) => CellValue::Text(s.clone()),
        Data::Error(_) | Data::Empty => CellValue::Null,
    }
}

/// 日時セルのシリアル値を1900年システムに揃える
///
/// calamineは1904年システムのフラグを公開していないため、
/// 同じ値の1900年システムの日時と比較して判定します。
fn serial_in_1900_system(dt: &ExcelDateTime) -> f64 {
    let serial = dt.as_f64();
    if *dt == ExcelDateTime::new(serial, ExcelDateTimeType::DateTime, false) {
        serial
    } else {
        debug!(serial, "Converting 1904 date system serial");
        serial + EXCEL_1904_OFFSET
    }
}

/// Excelのシリアル値（1900年システム）を日時に変換
///
/// - 起算日は1899年12月30日
/// - シリアル値60未満はExcelの1900年うるう年バグを考慮して1日補正
/// - 小数部は時刻（秒単位に丸め）
pub(crate) fn serial_to_datetime(serial: f64) -> Option<NaiveDateTime> {
    if !serial.is_finite() || !(0.0..MAX_EXCEL_SERIAL).contains(&serial) {
        return None;
    }

    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let whole_days = serial.floor();
    let mut days = whole_days as i64;
    if days < 60 {
        days += 1;
    }
    let seconds = ((serial - whole_days) * 86_400.0).round() as i64;

    epoch
        .checked_add_signed(Duration::days(days))?
        .checked_add_signed(Duration::seconds(seconds))
}

/// ISO 8601形式の日時・日付文字列を解釈
fn parse_iso_datetime(value: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}
