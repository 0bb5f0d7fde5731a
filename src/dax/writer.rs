//! DAX Serialization
//!
//! Writes a workflow graph as a Pegasus DAX 3.4 document: a replica
//! catalog of file elements, job elements with their arguments and file
//! usages, and child/parent elements for the dependency edges.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use chrono::Utc;
use log::info;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use super::model::{Adag, Arg, Job, JobId};
use crate::error::GenError;
use crate::VERSION;

const DAX_XMLNS: &str = "http://pegasus.isi.edu/schema/DAX";
const DAX_XSI: &str = "http://www.w3.org/2001/XMLSchema-instance";
const DAX_SCHEMA_LOCATION: &str =
    "http://pegasus.isi.edu/schema/DAX http://pegasus.isi.edu/schema/dax-3.4.xsd";
const DAX_VERSION: &str = "3.4";

/// Serializes a workflow graph as a DAX document.
pub fn write_dax<W: Write>(dax: &Adag, out: W) -> Result<(), GenError> {
    let mut writer = Writer::new_with_indent(out, b' ', 2);

    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    writer.write_event(Event::Comment(BytesText::new(&format!(
        " generated: {} ",
        Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
    ))))?;
    writer.write_event(Event::Comment(BytesText::new(&format!(
        " generated by: daxgen v{} ",
        VERSION
    ))))?;

    // Edges grouped by child, as child/parent elements.
    let mut children: BTreeMap<JobId, Vec<JobId>> = BTreeMap::new();
    for (parent, child) in dax.edges() {
        children.entry(child).or_default().push(parent);
    }

    let mut adag = BytesStart::new("adag");
    adag.push_attribute(("xmlns", DAX_XMLNS));
    adag.push_attribute(("xmlns:xsi", DAX_XSI));
    adag.push_attribute(("xsi:schemaLocation", DAX_SCHEMA_LOCATION));
    adag.push_attribute(("version", DAX_VERSION));
    adag.push_attribute(("name", dax.name()));
    adag.push_attribute(("jobCount", dax.job_count().to_string().as_str()));
    adag.push_attribute(("fileCount", dax.file_count().to_string().as_str()));
    adag.push_attribute(("childCount", children.len().to_string().as_str()));
    writer.write_event(Event::Start(adag))?;

    for file in dax.files() {
        let mut elem = BytesStart::new("file");
        elem.push_attribute(("name", file.lfn.as_str()));
        if file.pfns.is_empty() {
            writer.write_event(Event::Empty(elem))?;
            continue;
        }
        writer.write_event(Event::Start(elem))?;
        for pfn in &file.pfns {
            let mut elem = BytesStart::new("pfn");
            elem.push_attribute(("url", pfn.url.as_str()));
            elem.push_attribute(("site", pfn.site.as_str()));
            writer.write_event(Event::Empty(elem))?;
        }
        writer.write_event(Event::End(BytesEnd::new("file")))?;
    }

    for (i, job) in dax.jobs().iter().enumerate() {
        write_job(&mut writer, JobId(i), job)?;
    }

    for (child, parents) in &children {
        let mut elem = BytesStart::new("child");
        elem.push_attribute(("ref", child.to_string().as_str()));
        writer.write_event(Event::Start(elem))?;
        for parent in parents {
            let mut elem = BytesStart::new("parent");
            elem.push_attribute(("ref", parent.to_string().as_str()));
            writer.write_event(Event::Empty(elem))?;
        }
        writer.write_event(Event::End(BytesEnd::new("child")))?;
    }

    writer.write_event(Event::End(BytesEnd::new("adag")))?;
    Ok(())
}

/// Serializes a workflow graph to a file on disk.
pub fn write_dax_file(dax: &Adag, path: &Path) -> Result<(), GenError> {
    let file = File::create(path)?;
    let mut out = BufWriter::new(file);
    write_dax(dax, &mut out)?;
    out.flush()?;
    info!(
        "Wrote DAX '{}' to {} ({} jobs, {} files)",
        dax.name(),
        path.display(),
        dax.job_count(),
        dax.file_count()
    );
    Ok(())
}

fn write_job<W: Write>(writer: &mut Writer<W>, id: JobId, job: &Job) -> Result<(), GenError> {
    let mut elem = BytesStart::new("job");
    elem.push_attribute(("id", id.to_string().as_str()));
    elem.push_attribute(("name", job.name.as_str()));
    writer.write_event(Event::Start(elem))?;

    if !job.args().is_empty() {
        writer.write_event(Event::Start(BytesStart::new("argument")))?;
        for (i, arg) in job.args().iter().enumerate() {
            if i > 0 {
                writer.write_event(Event::Text(BytesText::new(" ")))?;
            }
            match arg {
                Arg::Plain(text) => {
                    writer.write_event(Event::Text(BytesText::new(text)))?;
                }
                Arg::FileRef(lfn) => {
                    let mut elem = BytesStart::new("file");
                    elem.push_attribute(("name", lfn.as_str()));
                    writer.write_event(Event::Empty(elem))?;
                }
            }
        }
        writer.write_event(Event::End(BytesEnd::new("argument")))?;
    }

    if let Some(lfn) = job.stdout_file() {
        let mut elem = BytesStart::new("stdout");
        elem.push_attribute(("name", lfn));
        elem.push_attribute(("link", "output"));
        writer.write_event(Event::Empty(elem))?;
    }
    if let Some(lfn) = job.stderr_file() {
        let mut elem = BytesStart::new("stderr");
        elem.push_attribute(("name", lfn));
        elem.push_attribute(("link", "output"));
        writer.write_event(Event::Empty(elem))?;
    }

    for (lfn, link) in job.uses() {
        let mut elem = BytesStart::new("uses");
        elem.push_attribute(("name", lfn.as_str()));
        elem.push_attribute(("link", link.to_string().as_str()));
        writer.write_event(Event::Empty(elem))?;
    }

    writer.write_event(Event::End(BytesEnd::new("job")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dax::model::FileNode;

    fn render(dax: &Adag) -> String {
        let mut buf = Vec::new();
        write_dax(dax, &mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    fn small_dax() -> Adag {
        let mut dax = Adag::new("CiHscDax");
        dax.add_file(
            FileNode::new("peg/registry.sqlite3")
                .with_pfn("/repo/registry.sqlite3", "local")
                .with_pfn("/repo/registry.sqlite3", "lsstvc"),
        );
        dax.add_file(FileNode::new("peg/corr/CORR-0903334-016.fits"));
        dax.add_file(FileNode::new("logProcessCcd.903334-16"));

        let job = Job::new("processCcd")
            .arg("peg")
            .arg("--output")
            .arg("peg")
            .arg("--doraise")
            .input("peg/registry.sqlite3")
            .output("peg/corr/CORR-0903334-016.fits")
            .stderr("logProcessCcd.903334-16");
        dax.add_job(job);
        dax
    }

    #[test]
    fn test_document_structure() {
        let xml = render(&small_dax());
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(xml.contains("generated by: daxgen v"));
        assert!(xml.contains("<adag"));
        assert!(xml.contains("name=\"CiHscDax\""));
        assert!(xml.contains("version=\"3.4\""));
        assert!(xml.contains("jobCount=\"1\""));
        assert!(xml.contains("fileCount=\"3\""));
        assert!(xml.ends_with("</adag>"));
    }

    #[test]
    fn test_file_elements() {
        let xml = render(&small_dax());
        assert!(xml.contains("<file name=\"peg/registry.sqlite3\">"));
        assert!(xml.contains("<pfn url=\"/repo/registry.sqlite3\" site=\"local\"/>"));
        assert!(xml.contains("<pfn url=\"/repo/registry.sqlite3\" site=\"lsstvc\"/>"));
        // Files without replicas collapse to an empty element.
        assert!(xml.contains("<file name=\"peg/corr/CORR-0903334-016.fits\"/>"));
    }

    #[test]
    fn test_job_element() {
        let xml = render(&small_dax());
        assert!(xml.contains("<job id=\"ID0000001\" name=\"processCcd\">"));
        assert!(xml.contains("<argument>peg --output peg --doraise</argument>"));
        assert!(xml.contains("<stderr name=\"logProcessCcd.903334-16\" link=\"output\"/>"));
        assert!(xml.contains("<uses name=\"peg/registry.sqlite3\" link=\"input\"/>"));
        assert!(
            xml.contains("<uses name=\"peg/corr/CORR-0903334-016.fits\" link=\"output\"/>")
        );
    }

    #[test]
    fn test_file_ref_argument() {
        let mut dax = Adag::new("test");
        dax.add_file(FileNode::new("skymapConfig.py"));
        dax.add_job(
            Job::new("makeSkyMap")
                .arg("peg")
                .arg("-C")
                .file_arg("skymapConfig.py")
                .arg("--doraise")
                .input("skymapConfig.py"),
        );

        let xml = render(&dax);
        assert!(xml.contains("-C <file name=\"skymapConfig.py\"/> --doraise"));
    }

    #[test]
    fn test_edges_grouped_by_child() {
        let mut dax = Adag::new("test");
        let p1 = dax.add_job(Job::new("one"));
        let p2 = dax.add_job(Job::new("two"));
        let c = dax.add_job(Job::new("three"));
        dax.depends(p1, c);
        dax.depends(p2, c);

        let xml = render(&dax);
        assert!(xml.contains("<child ref=\"ID0000003\">"));
        assert!(xml.contains("<parent ref=\"ID0000001\"/>"));
        assert!(xml.contains("<parent ref=\"ID0000002\"/>"));
        assert!(xml.contains("childCount=\"1\""));
    }

    #[test]
    fn test_escaping() {
        let mut dax = Adag::new("a<b&c");
        dax.add_file(FileNode::new("weird&name.fits"));
        dax.add_job(Job::new("stage").arg("filter=HSC-R^HSC-I").arg("x<y"));

        let xml = render(&dax);
        assert!(xml.contains("name=\"a&lt;b&amp;c\""));
        assert!(xml.contains("weird&amp;name.fits"));
        assert!(xml.contains("x&lt;y"));
    }

    #[test]
    fn test_write_dax_file() {
        use tempfile::tempdir;

        let dir = tempdir().unwrap();
        let path = dir.path().join("test.dax");
        write_dax_file(&small_dax(), &path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("<adag"));
    }
}
