use std::path::Path;

use anyhow::{Context, Result};
use rust_xlsxwriter::{Format, Workbook, Worksheet};

use crate::sprint::{ClusterSummary, ReactionRecord};

const RESPONSES_SHEET: &str = "responses";
const CLUSTERS_SHEET: &str = "clusters";

/// Writes responses and cluster summaries to a two-sheet workbook.
pub fn write_workbook(
    path: &Path,
    responses: &[ReactionRecord],
    clusters: &[ClusterSummary],
) -> Result<()> {
    let mut workbook = build_workbook(responses, clusters)?;
    workbook
        .save(path)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

fn build_workbook(responses: &[ReactionRecord], clusters: &[ClusterSummary]) -> Result<Workbook> {
    let mut workbook = Workbook::new();
    let header = Format::new().set_bold();

    let sheet = workbook.add_worksheet();
    sheet.set_name(RESPONSES_SHEET)?;
    write_header(sheet, &["persona", "cluster", "intent", "feedback"], &header)?;
    for (i, record) in responses.iter().enumerate() {
        let row = u32::try_from(i + 1)?;
        sheet.write_string(row, 0, &record.persona)?;
        sheet.write_number(row, 1, record.cluster as f64)?;
        sheet.write_number(row, 2, record.intent)?;
        sheet.write_string(row, 3, &record.feedback)?;
    }

    let sheet = workbook.add_worksheet();
    sheet.set_name(CLUSTERS_SHEET)?;
    write_header(sheet, &["cluster", "mean_intent", "summary"], &header)?;
    for (i, cluster) in clusters.iter().enumerate() {
        let row = u32::try_from(i + 1)?;
        sheet.write_number(row, 0, cluster.cluster as f64)?;
        sheet.write_number(row, 1, cluster.mean_intent)?;
        sheet.write_string(row, 2, &cluster.summary)?;
    }

    Ok(workbook)
}

fn write_header(sheet: &mut Worksheet, columns: &[&str], format: &Format) -> Result<()> {
    for (col, name) in columns.iter().enumerate() {
        sheet.write_string_with_format(0, u16::try_from(col)?, *name, format)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{fs::File, io::Read};

    use tempfile::tempdir;
    use zip::ZipArchive;

    use super::*;

    #[test]
    fn writes_xlsx_package() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("results.xlsx");
        let responses = vec![ReactionRecord {
            persona: "Liam Variant 1".to_string(),
            cluster: 0,
            intent: 7.0,
            feedback: "Clear and punchy.".to_string(),
        }];
        let clusters = vec![ClusterSummary {
            cluster: 0,
            mean_intent: 7.0,
            summary: "Likes the clarity".to_string(),
        }];

        write_workbook(&path, &responses, &clusters).unwrap();

        let mut magic = [0u8; 4];
        File::open(&path).unwrap().read_exact(&mut magic).unwrap();
        assert_eq!(&magic, b"PK\x03\x04");
    }

    fn part(path: &Path, name: &str) -> String {
        let mut archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
        let mut xml = String::new();
        archive
            .by_name(name)
            .unwrap()
            .read_to_string(&mut xml)
            .unwrap();
        xml
    }

    #[test]
    fn sheets_and_headers_match_layout() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("results.xlsx");
        let responses: Vec<ReactionRecord> = (0..3)
            .map(|i| ReactionRecord {
                persona: format!("Ava Variant {}", i + 1),
                cluster: i % 2,
                intent: 4.0 + i as f64,
                feedback: format!("Reply {i}"),
            })
            .collect();
        let clusters = vec![
            ClusterSummary {
                cluster: 0,
                mean_intent: 5.0,
                summary: "Wants lower fees".to_string(),
            },
            ClusterSummary {
                cluster: 1,
                mean_intent: 5.0,
                summary: "Trusts the brand".to_string(),
            },
        ];
        write_workbook(&path, &responses, &clusters).unwrap();

        let workbook = part(&path, "xl/workbook.xml");
        let responses_at = workbook.find(r#"name="responses""#).unwrap();
        let clusters_at = workbook.find(r#"name="clusters""#).unwrap();
        assert!(responses_at < clusters_at);

        let strings = part(&path, "xl/sharedStrings.xml");
        for header in [
            "persona",
            "cluster",
            "intent",
            "feedback",
            "mean_intent",
            "summary",
        ] {
            assert!(
                strings.contains(&format!(">{header}</t>")),
                "missing header {header}"
            );
        }

        let sheet = part(&path, "xl/worksheets/sheet1.xml");
        assert_eq!(sheet.matches("<row ").count(), responses.len() + 1);
        let sheet = part(&path, "xl/worksheets/sheet2.xml");
        assert_eq!(sheet.matches("<row ").count(), clusters.len() + 1);
    }

    #[test]
    fn empty_tables_still_export() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.xlsx");
        write_workbook(&path, &[], &[]).unwrap();
        assert!(path.is_file());
    }

    #[test]
    fn unwritable_path_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing").join("results.xlsx");
        assert!(write_workbook(&path, &[], &[]).is_err());
    }
}
