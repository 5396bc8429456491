use crate::dedup::MergedResult;

const HEADER: &str = "source,title,year,similarity,url";

/// Render merged results as CSV with columns
/// `source,title,year,similarity,url`. Contributing sources are joined
/// with `+`; an absent year leaves the column empty.
pub fn to_csv(merged: &[MergedResult]) -> String {
    let mut out = String::from(HEADER);
    out.push('\n');
    for cluster in merged {
        let sources = cluster
            .sources
            .iter()
            .map(|s| s.name())
            .collect::<Vec<_>>()
            .join("+");
        let year = cluster
            .representative
            .year
            .map(|y| y.to_string())
            .unwrap_or_default();
        out.push_str(&format!(
            "{},{},{},{:.4},{}\n",
            escape(&sources),
            escape(&cluster.representative.title),
            year,
            cluster.score,
            escape(&cluster.representative.url),
        ));
    }
    out
}

/// RFC-4180 quoting: wrap fields containing commas, quotes or newlines in
/// double quotes, doubling any embedded quotes.
fn escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
