//! 体积表与 QC 表 (csv).
//!
//! 共享表: 启动时写入 `["subject", 列名...]`, 每个成功的输入追加一行;
//! 单独表: 每个输入写一个新文件, 内容为 `["", 列名...]` 和一行数据.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use itertools::Itertools;

/// 共享表的首列列名.
const SUBJECT_COLUMN: &str = "subject";

/// 按 csv 规则转义单个字段.
fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn write_record<W, I, S>(w: &mut W, fields: I) -> io::Result<()>
where
    W: Write,
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let line = fields.into_iter().map(|f| escape(f.as_ref())).join(",");
    writeln!(w, "{line}")
}

/// 一行数据的数值格式.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ValueFormat {
    /// 最短的能无损还原的十进制表示 (体积).
    Shortest,

    /// 固定 4 位小数 (QC 分数).
    Fixed4,
}

impl ValueFormat {
    fn format(self, v: f64) -> String {
        match self {
            Self::Shortest => format!("{v}"),
            Self::Fixed4 => format!("{v:.4}"),
        }
    }
}

/// 新建共享表并写入表头. 已存在的同名文件会被覆盖.
pub fn write_header<S: AsRef<str>>(path: &Path, columns: &[S]) -> io::Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    let header = std::iter::once(SUBJECT_COLUMN).chain(columns.iter().map(AsRef::as_ref));
    write_record(&mut w, header)?;
    w.flush()
}

/// 向共享表追加一行.
pub fn append_row(path: &Path, subject: &str, values: &[f64], fmt: ValueFormat) -> io::Result<()> {
    let file = OpenOptions::new().append(true).create(true).open(path)?;
    let mut w = BufWriter::new(file);
    let row = std::iter::once(subject.to_string()).chain(values.iter().map(|&v| fmt.format(v)));
    write_record(&mut w, row)?;
    w.flush()
}

/// 写出只含一个输入的单独表.
pub fn write_single<S: AsRef<str>>(
    path: &Path,
    columns: &[S],
    subject: &str,
    values: &[f64],
    fmt: ValueFormat,
) -> io::Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    write_record(&mut w, std::iter::once("").chain(columns.iter().map(AsRef::as_ref)))?;
    let row = std::iter::once(subject.to_string()).chain(values.iter().map(|&v| fmt.format(v)));
    write_record(&mut w, row)?;
    w.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_escape() {
        assert_eq!(escape("Left-Cerebral-Cortex"), "Left-Cerebral-Cortex");
        assert_eq!(escape("a,b"), "\"a,b\"");
        assert_eq!(escape("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_shared_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vols.csv");
        write_header(&path, &["total intracranial", "Left-Cerebral-White-Matter"]).unwrap();
        append_row(&path, "sub-01", &[1200.5, 300.0], ValueFormat::Shortest).unwrap();
        append_row(&path, "sub-02", &[1100.125, 280.25], ValueFormat::Shortest).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(
            text,
            "subject,total intracranial,Left-Cerebral-White-Matter\n\
             sub-01,1200.5,300\n\
             sub-02,1100.125,280.25\n"
        );

        // 重新写表头会清空旧内容.
        write_header(&path, &["x"]).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "subject,x\n");
    }

    #[test]
    fn test_single_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qc.csv");
        write_single(&path, &["general white matter", "cerebellum"], "t1", &[0.8, 1.0], ValueFormat::Fixed4)
            .unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            ",general white matter,cerebellum\nt1,0.8000,1.0000\n"
        );
    }
}
