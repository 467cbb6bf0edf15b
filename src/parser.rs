use csv::{ReaderBuilder, StringRecord, Trim};
use tracing::debug;

use crate::domain::{CellValue, ColumnType, DataRecord, InferredSchema};
use crate::error::IngestError;

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCsv {
    pub schema: InferredSchema,
    pub records: Vec<DataRecord>,
}

/// Parses delimited text with a header row and infers a type per column.
#[derive(Debug, Clone)]
pub struct CsvParser {
    delimiter: u8,
}

impl Default for CsvParser {
    fn default() -> Self {
        Self::new(b',')
    }
}

impl CsvParser {
    pub fn new(delimiter: u8) -> Self {
        Self { delimiter }
    }

    pub fn parse(&self, raw: &[u8]) -> Result<ParsedCsv, IngestError> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .delimiter(self.delimiter)
            .trim(Trim::All)
            .from_reader(raw);

        let headers = reader.headers().map_err(csv_error)?.clone();
        let columns = validate_headers(&headers)?;

        let mut rows = Vec::new();
        for result in reader.records() {
            rows.push(result.map_err(csv_error)?);
        }

        if rows.is_empty() {
            return Err(IngestError::invalid_input("CSV file has no data rows"));
        }

        let schema: InferredSchema = columns
            .iter()
            .enumerate()
            .map(|(index, name)| (name.clone(), infer_column(&rows, index)))
            .collect();

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            records.push(convert_row(row, &schema)?);
        }

        debug!(
            "Parsed {} rows across {} columns",
            records.len(),
            schema.len()
        );

        Ok(ParsedCsv { schema, records })
    }
}

fn validate_headers(headers: &StringRecord) -> Result<Vec<String>, IngestError> {
    if headers.is_empty() {
        return Err(IngestError::invalid_input("CSV file is empty"));
    }

    let mut columns: Vec<String> = Vec::with_capacity(headers.len());
    for (index, name) in headers.iter().enumerate() {
        if name.is_empty() {
            return Err(IngestError::invalid_input(format!(
                "Column {} has an empty header",
                index + 1
            )));
        }
        if columns.iter().any(|existing| existing == name) {
            return Err(IngestError::invalid_input(format!(
                "Duplicate column name '{}'",
                name
            )));
        }
        columns.push(name.to_string());
    }
    Ok(columns)
}

fn infer_column(rows: &[StringRecord], index: usize) -> ColumnType {
    let mut values = rows
        .iter()
        .filter_map(|row| row.get(index))
        .filter(|value| !value.is_empty())
        .peekable();

    if values.peek().is_none() {
        return ColumnType::String;
    }

    let mut all_numbers = true;
    let mut all_booleans = true;
    for value in values {
        all_numbers = all_numbers && parse_number(value).is_some();
        all_booleans = all_booleans && parse_boolean(value).is_some();
        if !all_numbers && !all_booleans {
            return ColumnType::String;
        }
    }

    if all_numbers {
        ColumnType::Number
    } else {
        ColumnType::Boolean
    }
}

fn convert_row(row: &StringRecord, schema: &InferredSchema) -> Result<DataRecord, IngestError> {
    let mut record = DataRecord::new();
    for ((column, column_type), value) in schema.iter().zip(row.iter()) {
        if value.is_empty() {
            continue;
        }
        let cell = convert_value(value, column_type).ok_or_else(|| {
            IngestError::invalid_input(format!(
                "Value '{}' in column '{}' on line {} is not a valid {}",
                value,
                column,
                line_of(row),
                column_type
            ))
        })?;
        record.insert(column, cell);
    }
    Ok(record)
}

fn convert_value(value: &str, column_type: ColumnType) -> Option<CellValue> {
    match column_type {
        ColumnType::Number => parse_number(value).map(CellValue::Number),
        ColumnType::Boolean => parse_boolean(value).map(CellValue::Boolean),
        ColumnType::String => Some(CellValue::Text(value.to_string())),
    }
}

/// Integers become i64; anything else must be a finite float. Values that would
/// change when printed back (leading zeros, integers beyond i64, decimals with
/// more precision than an f64 holds) stay text.
fn parse_number(value: &str) -> Option<serde_json::Number> {
    let unsigned = value.strip_prefix(['-', '+']).unwrap_or(value);
    let mut chars = unsigned.chars();
    if let (Some('0'), Some(next)) = (chars.next(), chars.next()) {
        if next.is_ascii_digit() {
            return None;
        }
    }

    if let Ok(integer) = value.parse::<i64>() {
        return Some(integer.into());
    }
    if !unsigned.is_empty() && unsigned.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let float: f64 = value.parse().ok()?;
    if !float.is_finite() {
        return None;
    }
    let shortest = format!("{:e}", float.abs());
    if significant_digits(unsigned)? != significant_digits(&shortest)? {
        return None;
    }
    serde_json::Number::from_f64(float)
}

/// Splits an unsigned decimal into its digits without leading or trailing zeros
/// and the power of ten at the decimal point, so `0.0150` and `1.5e-2` both give
/// `("15", -1)`. Zero gives `("", 0)`.
fn significant_digits(text: &str) -> Option<(String, i64)> {
    let (mantissa, exponent) = match text.split_once(['e', 'E']) {
        Some((mantissa, exponent)) => (mantissa, exponent.parse::<i64>().ok()?),
        None => (text, 0),
    };
    let (integer, fraction) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    if !integer.chars().chain(fraction.chars()).all(|c| c.is_ascii_digit()) {
        return None;
    }

    let digits = format!("{}{}", integer, fraction);
    let leading = digits.len() - digits.trim_start_matches('0').len();
    let digits = digits.trim_matches('0');
    if digits.is_empty() {
        return Some((String::new(), 0));
    }
    let point = integer.len() as i64 - leading as i64 + exponent;
    Some((digits.to_string(), point))
}

fn parse_boolean(value: &str) -> Option<bool> {
    if value.eq_ignore_ascii_case("true") {
        Some(true)
    } else if value.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

fn line_of(row: &StringRecord) -> u64 {
    row.position().map(|p| p.line()).unwrap_or(0)
}

fn csv_error(err: csv::Error) -> IngestError {
    match err.kind() {
        csv::ErrorKind::UnequalLengths {
            pos,
            expected_len,
            len,
        } => IngestError::invalid_input(format!(
            "Row on line {} has {} fields but the header has {}",
            pos.as_ref().map(|p| p.line()).unwrap_or(0),
            len,
            expected_len
        )),
        csv::ErrorKind::Utf8 { .. } => IngestError::invalid_input("CSV file is not valid UTF-8"),
        _ => IngestError::invalid_input(format!("Malformed CSV: {}", err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &str) -> Result<ParsedCsv, IngestError> {
        CsvParser::default().parse(input.as_bytes())
    }

    #[test]
    fn infers_numbers_for_hour_and_susceptible() {
        let parsed = parse("hour,susceptible\n0,1\n1,2\n2,3\n").unwrap();

        let expected_schema: InferredSchema = [
            ("hour", ColumnType::Number),
            ("susceptible", ColumnType::Number),
        ]
        .into_iter()
        .collect();
        assert_eq!(parsed.schema, expected_schema);

        let expected: Vec<DataRecord> = [(0i64, 1i64), (1, 2), (2, 3)]
            .into_iter()
            .map(|(hour, susceptible)| {
                [("hour", hour), ("susceptible", susceptible)]
                    .into_iter()
                    .collect()
            })
            .collect();
        assert_eq!(parsed.records, expected);
        assert_eq!(
            serde_json::to_string(&parsed.records).unwrap(),
            r#"[{"hour":0,"susceptible":1},{"hour":1,"susceptible":2},{"hour":2,"susceptible":3}]"#
        );
    }

    #[test]
    fn mixed_columns_fall_back_to_string() {
        let parsed = parse("id,label,ratio,active\n1,a,0.5,true\n2,3,1e3,FALSE\n").unwrap();

        assert_eq!(parsed.schema.get("id"), Some(ColumnType::Number));
        assert_eq!(parsed.schema.get("label"), Some(ColumnType::String));
        assert_eq!(parsed.schema.get("ratio"), Some(ColumnType::Number));
        assert_eq!(parsed.schema.get("active"), Some(ColumnType::Boolean));

        let second = &parsed.records[1];
        assert_eq!(second.get("label"), Some(&CellValue::Text("3".to_string())));
        assert_eq!(second.get("active"), Some(&CellValue::Boolean(false)));
        assert_eq!(
            second.get("ratio"),
            Some(&CellValue::Number(serde_json::Number::from_f64(1000.0).unwrap()))
        );
    }

    #[test]
    fn empty_cells_are_omitted_and_do_not_affect_inference() {
        let parsed = parse("hour,note\n0,\n,late\n").unwrap();

        assert_eq!(parsed.schema.get("hour"), Some(ColumnType::Number));
        assert_eq!(parsed.records[0].keys().collect::<Vec<_>>(), vec!["hour"]);
        assert_eq!(parsed.records[1].keys().collect::<Vec<_>>(), vec!["note"]);
    }

    #[test]
    fn all_empty_column_is_string() {
        let parsed = parse("a,b\n1,\n2,\n").unwrap();
        assert_eq!(parsed.schema.get("b"), Some(ColumnType::String));
    }

    #[test]
    fn lossy_numbers_stay_text() {
        let parsed = parse("zip,big,nan\n02134,99999999999999999999,NaN\n").unwrap();
        assert_eq!(parsed.schema.get("zip"), Some(ColumnType::String));
        assert_eq!(parsed.schema.get("big"), Some(ColumnType::String));
        assert_eq!(parsed.schema.get("nan"), Some(ColumnType::String));
        assert_eq!(
            parsed.records[0].get("zip"),
            Some(&CellValue::Text("02134".to_string()))
        );

        let parsed = parse("x,y\n1.00000000000000000001,9007199254740993.0\n").unwrap();
        assert_eq!(parsed.schema.get("x"), Some(ColumnType::String));
        assert_eq!(parsed.schema.get("y"), Some(ColumnType::String));
        assert_eq!(
            parsed.records[0].get("y"),
            Some(&CellValue::Text("9007199254740993.0".to_string()))
        );
    }

    #[test]
    fn exact_decimals_stay_numbers() {
        let parsed = parse("a,b,c,d\n0.1,-0.0,1.50,2.5E-3\n").unwrap();
        for column in ["a", "b", "c", "d"] {
            assert_eq!(parsed.schema.get(column), Some(ColumnType::Number), "{}", column);
        }
        assert_eq!(
            parsed.records[0].get("c"),
            Some(&CellValue::Number(serde_json::Number::from_f64(1.5).unwrap()))
        );
    }

    #[test]
    fn significant_digits_ignore_notation() {
        assert_eq!(significant_digits("0.0150"), Some(("15".to_string(), -1)));
        assert_eq!(significant_digits("1.5e-2"), Some(("15".to_string(), -1)));
        assert_eq!(significant_digits("000"), Some((String::new(), 0)));
        assert_eq!(significant_digits("1.2.3"), None);
    }

    #[test]
    fn whitespace_around_fields_is_trimmed() {
        let parsed = parse(" hour , value \n 1 , 2.5 \n").unwrap();
        assert_eq!(
            parsed.schema.column_names().collect::<Vec<_>>(),
            vec!["hour", "value"]
        );
        assert_eq!(parsed.records[0].get("hour"), Some(&CellValue::from(1i64)));
    }

    #[test]
    fn custom_delimiter() {
        let parsed = CsvParser::new(b';').parse(b"a;b\n1;x\n").unwrap();
        assert_eq!(parsed.schema.len(), 2);
        assert_eq!(parsed.records[0].get("b"), Some(&CellValue::from("x")));
    }

    #[test]
    fn inference_is_deterministic() {
        let input = "x,y,z\n1,true,a\n2.5,false,b\n";
        assert_eq!(parse(input).unwrap(), parse(input).unwrap());
    }

    #[test]
    fn empty_input_is_rejected() {
        assert_eq!(parse("").unwrap_err().reason(), Some("CSV file is empty"));
    }

    #[test]
    fn header_only_input_is_rejected() {
        assert_eq!(
            parse("hour,susceptible\n").unwrap_err().reason(),
            Some("CSV file has no data rows")
        );
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let err = parse("a,b\n1,2\n3\n").unwrap_err();
        assert_eq!(
            err.reason(),
            Some("Row on line 3 has 1 fields but the header has 2")
        );
    }

    #[test]
    fn bad_headers_are_rejected() {
        assert_eq!(
            parse("a,a\n1,2\n").unwrap_err().reason(),
            Some("Duplicate column name 'a'")
        );
        assert_eq!(
            parse("a,,c\n1,2,3\n").unwrap_err().reason(),
            Some("Column 2 has an empty header")
        );
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        let err = CsvParser::default().parse(b"a\n\xff\xfe\n").unwrap_err();
        assert_eq!(err.reason(), Some("CSV file is not valid UTF-8"));
    }

    #[test]
    fn conversion_failure_names_the_cell() {
        let row = StringRecord::from(vec!["abc"]);
        let schema: InferredSchema = [("n", ColumnType::Number)].into_iter().collect();
        let err = convert_row(&row, &schema).unwrap_err();
        assert_eq!(
            err.reason(),
            Some("Value 'abc' in column 'n' on line 0 is not a valid number")
        );
    }
}
