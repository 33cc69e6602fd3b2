//! Workbook rendering for the cost report
//!
//! The sheet is first laid out as a `ReportSheet` (plain rows of decimals
//! and highlight markers), then rendered with `rust_xlsxwriter`. The file is
//! written to a temporary sibling and renamed into place, so a failed run
//! never leaves a partial workbook at the output path.
//!
//! Highlights are static fills taken from the classifier's flags, not Excel
//! conditional formatting. The sensitivity in the header records the value
//! the fills were computed with; editing it in the workbook re-highlights
//! nothing.

use crate::types::{
    BillingPeriod, CallerIdentity, ChangeDirection, ChangeFlag, MonthlyAggregate, ReportError,
    Result,
};
use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_xlsxwriter::{Color, Format, FormatAlign, Workbook, Worksheet, XlsxError};
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

pub const WORKSHEET_NAME: &str = "Cost and usage report";
pub const TOTAL_LABEL: &str = "Total cost";
pub const SENSITIVITY_LABEL: &str = "Sensitivity (applied at generation)";

const SECTION_HEADER_ROW: u32 = 5;
const TABLE_HEADER_ROW: u32 = 6;
const FIRST_DATA_ROW: u32 = TABLE_HEADER_ROW + 1;

const INCREASE_COLOR: u32 = 0xFFC7CE;
const DECREASE_COLOR: u32 = 0xC6EFCE;

/// Header information written above the table
#[derive(Debug, Clone)]
pub struct ReportContext {
    pub identity: CallerIdentity,
    pub generated_on: NaiveDate,
    pub sensitivity: Decimal,
    pub currency: String,
}

/// One table row: a service (or the total) across every month
#[derive(Debug, Clone, PartialEq)]
pub struct ReportRow {
    pub label: String,
    pub monthly: Vec<Decimal>,
    pub normalized: Vec<Decimal>,
    /// Highlight of each normalized cell; the first month never has one
    pub highlights: Vec<Option<ChangeDirection>>,
}

/// Cell layout of the report table
#[derive(Debug, Clone, PartialEq)]
pub struct ReportSheet {
    pub periods: Vec<BillingPeriod>,
    pub rows: Vec<ReportRow>,
}

impl ReportSheet {
    /// Lay out the total row followed by services, most expensive (newest month) first
    pub fn build(
        aggregates: &[MonthlyAggregate],
        flags: &[ChangeFlag],
        total_flags: &[ChangeFlag],
    ) -> Self {
        let periods: Vec<BillingPeriod> = aggregates.iter().map(|a| a.period).collect();

        let mut rows = vec![ReportRow {
            label: TOTAL_LABEL.to_string(),
            monthly: aggregates.iter().map(|a| a.total_cost).collect(),
            normalized: aggregates.iter().map(|a| a.normalized_daily_cost).collect(),
            highlights: highlights_for(&periods, total_flags.iter()),
        }];

        let mut flags_by_service: HashMap<&str, Vec<&ChangeFlag>> = HashMap::new();
        for flag in flags {
            flags_by_service
                .entry(flag.service_name.as_str())
                .or_default()
                .push(flag);
        }

        let mut services: Vec<String> = crate::services::Aggregator::services(aggregates)
            .into_iter()
            .collect();
        let newest = aggregates.last();
        services.sort_by(|a, b| {
            let cost = |s: &str| newest.map(|m| m.cost_of(s)).unwrap_or(Decimal::ZERO);
            cost(b.as_str())
                .cmp(&cost(a.as_str()))
                .then_with(|| a.cmp(b))
        });

        for service in services {
            let service_flags = flags_by_service
                .get(service.as_str())
                .map(|v| v.as_slice())
                .unwrap_or(&[]);
            rows.push(ReportRow {
                monthly: aggregates.iter().map(|a| a.cost_of(&service)).collect(),
                normalized: aggregates.iter().map(|a| a.normalized(&service)).collect(),
                highlights: highlights_for(&periods, service_flags.iter().copied()),
                label: service,
            });
        }

        Self { periods, rows }
    }

    fn month_count(&self) -> u16 {
        self.periods.len() as u16
    }

    /// Column of the first normalized value (one blank column after the monthly block)
    pub fn normalized_start_col(&self) -> u16 {
        self.month_count() + 2
    }

    fn comments_col(&self) -> u16 {
        self.normalized_start_col() + self.month_count()
    }

    fn suggestions_col(&self) -> u16 {
        self.comments_col() + 1
    }

    /// Render the sheet into a workbook
    pub fn render(&self, context: &ReportContext) -> Result<Workbook> {
        let mut workbook = Workbook::new();
        let worksheet = workbook.add_worksheet();
        self.render_into(worksheet, context).map_err(workbook_error)?;
        Ok(workbook)
    }

    fn render_into(
        &self,
        ws: &mut Worksheet,
        context: &ReportContext,
    ) -> std::result::Result<(), XlsxError> {
        let months = self.month_count();
        let norm_start = self.normalized_start_col();
        let last_col = self.suggestions_col();

        let header = Format::new()
            .set_text_wrap()
            .set_align(FormatAlign::Center)
            .set_align(FormatAlign::Top);
        let money = Format::new().set_num_format("0.00");
        let increase = money
            .clone()
            .set_background_color(Color::RGB(INCREASE_COLOR))
            .set_font_color(Color::Black);
        let decrease = money
            .clone()
            .set_background_color(Color::RGB(DECREASE_COLOR))
            .set_font_color(Color::Black);

        ws.set_name(WORKSHEET_NAME)?;
        ws.set_column_width(0, 30)?;
        for col in 1..self.comments_col() {
            ws.set_column_width(col, 12)?;
        }
        ws.set_column_width(self.comments_col(), 30)?;
        ws.set_column_width(self.suggestions_col(), 30)?;

        merge_or_write(
            ws,
            0,
            0,
            last_col,
            &format!("Generated using aws-cost-report v{}", env!("CARGO_PKG_VERSION")),
            &header,
        )?;
        merge_or_write(
            ws,
            1,
            0,
            last_col,
            &format!(
                "Generated by {} for account {} on {}",
                context.identity.user_id(),
                context.identity.account_id,
                context.generated_on.format("%Y-%m-%d")
            ),
            &header,
        )?;
        ws.write_string(2, 0, SENSITIVITY_LABEL)?;
        ws.write_number(2, 1, to_cell(context.sensitivity, None))?;
        ws.write_string(3, 0, "Currency")?;
        ws.write_string(3, 1, &context.currency)?;

        ws.set_row_height(SECTION_HEADER_ROW, 30)?;
        merge_or_write(
            ws,
            SECTION_HEADER_ROW,
            0,
            months,
            "Monthly unblended cost per service",
            &header,
        )?;
        merge_or_write(
            ws,
            SECTION_HEADER_ROW,
            norm_start,
            norm_start + months.saturating_sub(1),
            "Normalized values by number of days in the given month",
            &header,
        )?;

        ws.write_string(TABLE_HEADER_ROW, 0, "Service")?;
        for (i, period) in self.periods.iter().enumerate() {
            let label = period.label();
            ws.write_string(TABLE_HEADER_ROW, 1 + i as u16, &label)?;
            ws.write_string(TABLE_HEADER_ROW, norm_start + i as u16, &label)?;
        }
        ws.write_string_with_format(TABLE_HEADER_ROW, self.comments_col(), "Comments", &header)?;
        ws.write_string_with_format(
            TABLE_HEADER_ROW,
            self.suggestions_col(),
            "Suggestions",
            &header,
        )?;

        for (r, row) in self.rows.iter().enumerate() {
            let excel_row = FIRST_DATA_ROW + r as u32;
            ws.write_string(excel_row, 0, &row.label)?;
            for (i, value) in row.monthly.iter().enumerate() {
                ws.write_number_with_format(excel_row, 1 + i as u16, to_cell(*value, Some(2)), &money)?;
            }
            for (i, value) in row.normalized.iter().enumerate() {
                let format = match row.highlights.get(i).copied().flatten() {
                    Some(ChangeDirection::Increase) => &increase,
                    Some(ChangeDirection::Decrease) => &decrease,
                    None => &money,
                };
                ws.write_number_with_format(
                    excel_row,
                    norm_start + i as u16,
                    to_cell(*value, Some(2)),
                    format,
                )?;
            }
        }

        Ok(())
    }

    /// Render and atomically write the workbook to `path`
    pub fn save(&self, context: &ReportContext, path: &Path) -> Result<()> {
        let mut workbook = self.render(context)?;
        let bytes = workbook.save_to_buffer().map_err(workbook_error)?;
        write_atomically(path, &bytes)
    }
}

/// Highlight per period from the flags ending in that period
fn highlights_for<'a>(
    periods: &[BillingPeriod],
    flags: impl Iterator<Item = &'a ChangeFlag>,
) -> Vec<Option<ChangeDirection>> {
    let mut highlights = vec![None; periods.len()];
    for flag in flags.filter(|f| f.exceeds_threshold) {
        if let Some(i) = periods.iter().position(|p| *p == flag.to_period) {
            highlights[i] = Some(flag.direction());
        }
    }
    highlights
}

/// Decimal to spreadsheet number, optionally rounded for display
fn to_cell(value: Decimal, dp: Option<u32>) -> f64 {
    let value = match dp {
        Some(dp) => value.round_dp(dp),
        None => value,
    };
    value.to_f64().unwrap_or(0.0)
}

fn merge_or_write(
    ws: &mut Worksheet,
    row: u32,
    first_col: u16,
    last_col: u16,
    text: &str,
    format: &Format,
) -> std::result::Result<(), XlsxError> {
    if last_col > first_col {
        ws.merge_range(row, first_col, row, last_col, text, format)?;
    } else {
        ws.write_string_with_format(row, first_col, text, format)?;
    }
    Ok(())
}

fn workbook_error(e: XlsxError) -> ReportError {
    ReportError::Workbook(e.to_string())
}

/// Write to a temp file next to `path`, fsync, then rename over `path`
pub fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| ReportError::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::classifier::{classify, classify_totals};
    use std::collections::BTreeMap;
    use std::io::Read;
    use tempfile::TempDir;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn month(m: u32, services: &[(&str, &str)]) -> MonthlyAggregate {
        let period =
            BillingPeriod::month_of(NaiveDate::from_ymd_opt(2024, m, 1).unwrap()).unwrap();
        let per_service: BTreeMap<String, Decimal> = services
            .iter()
            .map(|(name, cost)| (name.to_string(), dec(cost)))
            .collect();
        MonthlyAggregate::from_services(period, per_service)
    }

    /// January (31 days), February 2024 (29 days), March (31 days)
    fn synthetic() -> Vec<MonthlyAggregate> {
        vec![
            month(1, &[("Amazon EC2", "310"), ("Amazon S3", "62")]),
            month(2, &[("Amazon EC2", "290"), ("Amazon S3", "29")]),
            month(3, &[("Amazon EC2", "372"), ("Amazon S3", "31"), ("AWS Lambda", "15.5")]),
        ]
    }

    fn sheet() -> ReportSheet {
        let months = synthetic();
        let flags = classify(&months, dec("0.1"));
        let totals = classify_totals(&months, dec("0.1"), TOTAL_LABEL);
        ReportSheet::build(&months, &flags, &totals)
    }

    fn context() -> ReportContext {
        ReportContext {
            identity: CallerIdentity {
                account_id: "123456789012".into(),
                arn: "arn:aws:iam::123456789012:user/report-bot".into(),
            },
            generated_on: NaiveDate::from_ymd_opt(2024, 4, 2).unwrap(),
            sensitivity: dec("0.1"),
            currency: "USD".into(),
        }
    }

    /// Unzip one part of a saved workbook
    fn read_part(path: &Path, name: &str) -> String {
        let file = std::fs::File::open(path).unwrap();
        let mut archive = zip::ZipArchive::new(file).unwrap();
        let mut part = archive.by_name(name).unwrap();
        let mut xml = String::new();
        part.read_to_string(&mut xml).unwrap();
        xml
    }

    fn attr<'a>(tag: &'a str, name: &str) -> Option<&'a str> {
        let key = format!(" {}=\"", name);
        let start = tag.find(&key)? + key.len();
        let end = tag[start..].find('"')?;
        Some(&tag[start..start + end])
    }

    /// Value and style index of a numeric cell such as `H8`
    fn cell(sheet_xml: &str, reference: &str) -> (f64, Option<usize>) {
        let open = format!("<c r=\"{}\"", reference);
        let start = sheet_xml
            .find(&open)
            .unwrap_or_else(|| panic!("no cell {}", reference));
        let element = &sheet_xml[start..];
        let element = &element[..element.find("</c>").unwrap()];
        let tag = &element[..element.find('>').unwrap()];
        let style = attr(tag, "s").map(|s| s.parse().unwrap());
        let value = element.split("<v>").nth(1).unwrap();
        let value = value[..value.find("</v>").unwrap()].parse().unwrap();
        (value, style)
    }

    /// The `n`th `<name>` element inside the first `<container>` block
    fn nth_element<'a>(xml: &'a str, container: &str, name: &str, n: usize) -> &'a str {
        let block = &xml[xml.find(&format!("<{}", container)).unwrap()..];
        let block = &block[..block.find(&format!("</{}>", container)).unwrap()];
        let open = format!("<{}", name);
        block
            .match_indices(open.as_str())
            .map(|(i, _)| &block[i..])
            .filter(|rest| {
                rest[open.len()..].starts_with(|c: char| c == ' ' || c == '>' || c == '/')
            })
            .nth(n)
            .unwrap()
    }

    /// ARGB background of a cell style, `None` when the style has no fill colour
    fn fill_color(styles_xml: &str, style: Option<usize>) -> Option<String> {
        let xf = nth_element(styles_xml, "cellXfs", "xf", style.unwrap_or(0));
        let xf = &xf[..xf.find('>').unwrap()];
        let fill_id: usize = attr(xf, "fillId")?.parse().unwrap();
        let fill = nth_element(styles_xml, "fills", "fill", fill_id);
        let fill = &fill[..fill.find("</fill>").unwrap_or(fill.len())];
        attr(fill, "rgb").map(str::to_string)
    }

    // ========== ReportSheet::build ==========

    #[test]
    fn test_sheet_total_row_first() {
        let sheet = sheet();
        let total = &sheet.rows[0];

        assert_eq!(total.label, TOTAL_LABEL);
        assert_eq!(total.monthly, vec![dec("372"), dec("319"), dec("418.5")]);
        assert_eq!(total.normalized[0], dec("12"));
        assert_eq!(total.normalized[1], dec("11"));
        assert_eq!(total.normalized[2], dec("13.5"));
    }

    #[test]
    fn test_sheet_services_sorted_by_newest_month() {
        let sheet = sheet();
        let labels: Vec<&str> = sheet.rows.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(
            labels,
            vec![TOTAL_LABEL, "Amazon EC2", "Amazon S3", "AWS Lambda"]
        );
    }

    #[test]
    fn test_sheet_missing_months_are_zero() {
        let sheet = sheet();
        let lambda = sheet.rows.iter().find(|r| r.label == "AWS Lambda").unwrap();
        assert_eq!(lambda.monthly, vec![Decimal::ZERO, Decimal::ZERO, dec("15.5")]);
        assert_eq!(lambda.normalized[2], dec("0.5"));
    }

    #[test]
    fn test_sheet_highlights_match_classifier() {
        let months = synthetic();
        let flags = classify(&months, dec("0.1"));
        let sheet = ReportSheet::build(&months, &flags, &[]);

        for flag in &flags {
            let row = sheet
                .rows
                .iter()
                .find(|r| r.label == flag.service_name)
                .unwrap();
            let col = sheet
                .periods
                .iter()
                .position(|p| *p == flag.to_period)
                .unwrap();
            let expected = flag.exceeds_threshold.then(|| flag.direction());
            assert_eq!(row.highlights[col], expected, "{}", flag.service_name);
        }

        // EC2: 10/day -> 10/day -> 12/day
        let ec2 = &sheet.rows[1];
        assert_eq!(
            ec2.highlights,
            vec![None, None, Some(ChangeDirection::Increase)]
        );
        // S3: 2/day -> 1/day -> 1/day
        let s3 = &sheet.rows[2];
        assert_eq!(
            s3.highlights,
            vec![None, Some(ChangeDirection::Decrease), None]
        );
        // Lambda appears in March
        let lambda = &sheet.rows[3];
        assert_eq!(
            lambda.highlights,
            vec![None, None, Some(ChangeDirection::Increase)]
        );
    }

    #[test]
    fn test_sheet_total_highlights() {
        // Total: 12/day -> 11/day (-8.3%) -> 13.5/day (+22.7%)
        let sheet = sheet();
        let total = &sheet.rows[0];
        assert_eq!(
            total.highlights,
            vec![None, None, Some(ChangeDirection::Increase)]
        );
    }

    #[test]
    fn test_sheet_columns() {
        let sheet = sheet();
        assert_eq!(sheet.normalized_start_col(), 5);
        assert_eq!(sheet.comments_col(), 8);
        assert_eq!(sheet.suggestions_col(), 9);
    }

    #[test]
    fn test_to_cell_rounds_for_display_only() {
        assert_eq!(to_cell(dec("10.0034482758"), Some(2)), 10.0);
        assert_eq!(to_cell(dec("0.125"), None), 0.125);
    }

    // ========== save ==========

    #[test]
    fn test_save_writes_xlsx() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("report.xlsx");

        sheet().save(&context(), &path).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.starts_with(b"PK"));
        // Only the report remains, no temp files
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_saved_workbook_values_and_fills() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("report.xlsx");
        sheet().save(&context(), &path).unwrap();

        let sheet_xml = read_part(&path, "xl/worksheets/sheet1.xml");
        let styles_xml = read_part(&path, "xl/styles.xml");
        let strings_xml = read_part(&path, "xl/sharedStrings.xml");

        // Rows 8-11: total, EC2, S3, Lambda. B-D monthly, F-H per day.
        let expected = [
            (8, [372.0, 319.0, 418.5], [12.0, 11.0, 13.5]),
            (9, [310.0, 290.0, 372.0], [10.0, 10.0, 12.0]),
            (10, [62.0, 29.0, 31.0], [2.0, 1.0, 1.0]),
            (11, [0.0, 0.0, 15.5], [0.0, 0.0, 0.5]),
        ];
        for (row, monthly, per_day) in expected {
            for (col, value) in ["B", "C", "D"].into_iter().zip(monthly) {
                let reference = format!("{}{}", col, row);
                assert_eq!(cell(&sheet_xml, &reference).0, value, "{}", reference);
            }
            for (col, value) in ["F", "G", "H"].into_iter().zip(per_day) {
                let reference = format!("{}{}", col, row);
                assert_eq!(cell(&sheet_xml, &reference).0, value, "{}", reference);
            }
        }

        let fill = |reference: &str| fill_color(&styles_xml, cell(&sheet_xml, reference).1);
        let red = Some("FFFFC7CE".to_string());
        let green = Some("FFC6EFCE".to_string());
        for reference in ["H8", "H9", "H11"] {
            assert_eq!(fill(reference), red, "{}", reference);
        }
        assert_eq!(fill("G10"), green);
        for reference in ["F8", "G8", "F9", "G9", "F10", "H10", "F11", "G11", "B8", "D11"] {
            assert_eq!(fill(reference), None, "{}", reference);
        }

        assert_eq!(cell(&sheet_xml, "B3").0, 0.1);
        assert!(strings_xml.contains(SENSITIVITY_LABEL));
        assert!(strings_xml.contains(TOTAL_LABEL));
    }

    #[test]
    fn test_save_overwrites_existing_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("report.xlsx");
        std::fs::write(&path, b"stale").unwrap();

        sheet().save(&context(), &path).unwrap();

        assert!(std::fs::read(&path).unwrap().starts_with(b"PK"));
    }

    #[test]
    fn test_save_unwritable_path_is_io_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("missing-dir").join("report.xlsx");

        let err = sheet().save(&context(), &path).unwrap_err();

        assert!(matches!(err, ReportError::Io(_)));
        assert!(!path.exists());
    }

    #[test]
    fn test_save_onto_directory_leaves_no_temp_file() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("occupied");
        std::fs::create_dir(&target).unwrap();
        std::fs::write(target.join("keep"), b"x").unwrap();

        let err = sheet().save(&context(), &target).unwrap_err();

        assert!(matches!(err, ReportError::Io(_)));
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_render_single_month() {
        let months = vec![month(1, &[("Amazon EC2", "31")])];
        let sheet = ReportSheet::build(&months, &[], &[]);
        assert!(sheet.render(&context()).is_ok());
    }
}
