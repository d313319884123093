//! Extension → MIME type table.

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Content type for a file extension (without the dot). Case-sensitive, like
/// the enumerator's allow-list. Unknown extensions map to a generic binary type.
pub fn content_type_for(extension: &str) -> &'static str {
    match extension {
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "xlsm" => "application/vnd.ms-excel.sheet.macroEnabled.12",
        "xlsb" => "application/vnd.ms-excel.sheet.binary.macroEnabled.12",
        "ods" => "application/vnd.oasis.opendocument.spreadsheet",
        "csv" => "text/csv",
        _ => DEFAULT_CONTENT_TYPE,
    }
}
