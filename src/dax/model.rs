//! Workflow Graph Model
//!
//! Core data structures for the abstract workflow: file nodes, job nodes
//! and the DAG that owns them.
//!
//! The graph enforces the central bookkeeping rule of DAX generation:
//! a logical file name is registered at most once, no matter how many
//! jobs share it (calibration frames are typically consumed by dozens of
//! per-ccd jobs). Dependency edges can be declared explicitly or inferred
//! from shared file usage: the job producing a file precedes every job
//! consuming it.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

use log::{debug, warn};

use crate::error::GenError;

/// A physical location of a file at a named site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pfn {
    pub url: String,
    pub site: String,
}

/// A file node: one logical name plus zero or more physical locations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileNode {
    /// Logical file name, unique within a workflow.
    pub lfn: String,
    /// Physical replicas; empty for files that only exist once the
    /// workflow has run.
    pub pfns: Vec<Pfn>,
}

impl FileNode {
    /// Creates a file node with no physical locations.
    pub fn new(lfn: impl Into<String>) -> Self {
        Self {
            lfn: lfn.into(),
            pfns: Vec::new(),
        }
    }

    /// Adds a physical location, builder style.
    pub fn with_pfn(mut self, url: impl Into<String>, site: impl Into<String>) -> Self {
        self.add_pfn(url, site);
        self
    }

    /// Adds a physical location.
    pub fn add_pfn(&mut self, url: impl Into<String>, site: impl Into<String>) {
        self.pfns.push(Pfn {
            url: url.into(),
            site: site.into(),
        });
    }
}

/// Direction of a job's file usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Link {
    Input,
    Output,
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => write!(f, "input"),
            Self::Output => write!(f, "output"),
        }
    }
}

/// One command-line argument of a job: either literal text or a
/// reference to a workflow file (rendered as a file element so the
/// planner can substitute the staged path).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    Plain(String),
    FileRef(String),
}

/// A job node: a named pipeline stage with its arguments and file usages.
#[derive(Debug, Clone)]
pub struct Job {
    /// Stage name, e.g. "processCcd". Not unique; many jobs of the same
    /// stage usually exist.
    pub name: String,
    args: Vec<Arg>,
    uses: Vec<(String, Link)>,
    seen: HashSet<(String, Link)>,
    stdout: Option<String>,
    stderr: Option<String>,
}

impl Job {
    /// Creates a job for a pipeline stage.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
            uses: Vec::new(),
            seen: HashSet::new(),
            stdout: None,
            stderr: None,
        }
    }

    /// Appends a literal argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(Arg::Plain(arg.into()));
        self
    }

    /// Appends a file-reference argument (e.g. a `-C` config override).
    pub fn file_arg(mut self, lfn: impl Into<String>) -> Self {
        self.args.push(Arg::FileRef(lfn.into()));
        self
    }

    /// Declares an input file. Duplicate declarations are dropped.
    pub fn input(mut self, lfn: impl Into<String>) -> Self {
        self.uses_file(lfn, Link::Input);
        self
    }

    /// Declares an output file. Duplicate declarations are dropped.
    pub fn output(mut self, lfn: impl Into<String>) -> Self {
        self.uses_file(lfn, Link::Output);
        self
    }

    /// Redirects standard error to a log file, which also becomes an
    /// output of the job.
    pub fn stderr(mut self, lfn: impl Into<String>) -> Self {
        let lfn = lfn.into();
        self.stderr = Some(lfn.clone());
        self.uses_file(lfn, Link::Output);
        self
    }

    /// Redirects standard output to a log file, which also becomes an
    /// output of the job.
    pub fn stdout(mut self, lfn: impl Into<String>) -> Self {
        let lfn = lfn.into();
        self.stdout = Some(lfn.clone());
        self.uses_file(lfn, Link::Output);
        self
    }

    fn uses_file(&mut self, lfn: impl Into<String>, link: Link) {
        let entry = (lfn.into(), link);
        if self.seen.insert(entry.clone()) {
            self.uses.push(entry);
        }
    }

    /// The job's arguments in order.
    pub fn args(&self) -> &[Arg] {
        &self.args
    }

    /// All declared file usages in declaration order.
    pub fn uses(&self) -> &[(String, Link)] {
        &self.uses
    }

    /// Logical names of declared inputs.
    pub fn inputs(&self) -> impl Iterator<Item = &str> {
        self.uses
            .iter()
            .filter(|(_, link)| *link == Link::Input)
            .map(|(lfn, _)| lfn.as_str())
    }

    /// Logical names of declared outputs.
    pub fn outputs(&self) -> impl Iterator<Item = &str> {
        self.uses
            .iter()
            .filter(|(_, link)| *link == Link::Output)
            .map(|(lfn, _)| lfn.as_str())
    }

    pub fn stdout_file(&self) -> Option<&str> {
        self.stdout.as_deref()
    }

    pub fn stderr_file(&self) -> Option<&str> {
        self.stderr.as_deref()
    }
}

/// Identifier of a job within one workflow graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId(pub(crate) usize);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Pegasus-style stable job ids.
        write!(f, "ID{:07}", self.0 + 1)
    }
}

/// The abstract workflow graph: a file catalog, a job list and the
/// dependency edges between jobs.
#[derive(Debug, Clone, Default)]
pub struct Adag {
    name: String,
    files: Vec<FileNode>,
    index: HashMap<String, usize>,
    jobs: Vec<Job>,
    edges: Vec<(usize, usize)>,
    edge_set: HashSet<(usize, usize)>,
}

impl Adag {
    /// Creates an empty workflow graph.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registers a file node. At most one node exists per logical name:
    /// if the name is already present the call is a no-op and `false` is
    /// returned. The first registration wins, so register physical
    /// locations together with the node.
    pub fn add_file(&mut self, file: FileNode) -> bool {
        if let Some(&existing) = self.index.get(&file.lfn) {
            if !file.pfns.is_empty() && self.files[existing].pfns != file.pfns {
                warn!(
                    "File '{}' registered again with different replicas; keeping the first",
                    file.lfn
                );
            }
            return false;
        }
        debug!("Registering file '{}' ({} replicas)", file.lfn, file.pfns.len());
        self.index.insert(file.lfn.clone(), self.files.len());
        self.files.push(file);
        true
    }

    /// True if a file node with this logical name is registered.
    pub fn has_file(&self, lfn: &str) -> bool {
        self.index.contains_key(lfn)
    }

    /// Looks up a registered file node.
    pub fn file(&self, lfn: &str) -> Option<&FileNode> {
        self.index.get(lfn).map(|&i| &self.files[i])
    }

    /// All registered files in registration order.
    pub fn files(&self) -> &[FileNode] {
        &self.files
    }

    /// Appends a job and returns its workflow-unique id.
    pub fn add_job(&mut self, job: Job) -> JobId {
        let id = JobId(self.jobs.len());
        debug!("Adding job {} ({})", id, job.name);
        self.jobs.push(job);
        id
    }

    /// All jobs in insertion order.
    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    /// Looks up a job by id.
    pub fn job(&self, id: JobId) -> Option<&Job> {
        self.jobs.get(id.0)
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Declares an explicit parent -> child ordering between two jobs.
    pub fn depends(&mut self, parent: JobId, child: JobId) {
        if parent == child {
            warn!("Ignoring self-dependency on job {}", parent);
            return;
        }
        if self.edge_set.insert((parent.0, child.0)) {
            self.edges.push((parent.0, child.0));
        }
    }

    /// All dependency edges as (parent, child) pairs.
    pub fn edges(&self) -> impl Iterator<Item = (JobId, JobId)> + '_ {
        self.edges.iter().map(|&(p, c)| (JobId(p), JobId(c)))
    }

    /// Derives dependency edges from shared file usage.
    ///
    /// If job A declares file X as an output and job B declares X as an
    /// input, then A precedes B. A file with more than one producer is a
    /// generation bug and is rejected.
    pub fn infer_file_dependencies(&mut self) -> Result<(), GenError> {
        let mut producer: HashMap<&str, usize> = HashMap::new();
        for (i, job) in self.jobs.iter().enumerate() {
            for lfn in job.outputs() {
                if let Some(&other) = producer.get(lfn) {
                    debug!(
                        "File '{}' produced by jobs {} and {}",
                        lfn,
                        JobId(other),
                        JobId(i)
                    );
                    return Err(GenError::DuplicateProducer(lfn.to_string()));
                }
                producer.insert(lfn, i);
            }
        }

        let mut derived = Vec::new();
        for (i, job) in self.jobs.iter().enumerate() {
            for lfn in job.inputs() {
                if let Some(&p) = producer.get(lfn) {
                    if p != i {
                        derived.push((JobId(p), JobId(i)));
                    }
                }
            }
        }

        let count = derived.len();
        for (parent, child) in derived {
            self.depends(parent, child);
        }
        debug!("Derived {} dependency edges from file usage", count);
        Ok(())
    }

    /// Validates the graph before serialization.
    ///
    /// Checks that every file a job uses is registered and that the
    /// dependency edges form a DAG (Kahn's algorithm).
    pub fn validate(&self) -> Result<(), GenError> {
        for job in &self.jobs {
            for (lfn, _) in job.uses() {
                if !self.has_file(lfn) {
                    return Err(GenError::InvalidInput(format!(
                        "job '{}' uses unregistered file '{}'",
                        job.name, lfn
                    )));
                }
            }
        }

        // Kahn's algorithm over the explicit edge list.
        let mut in_degree = vec![0usize; self.jobs.len()];
        let mut successors: HashMap<usize, Vec<usize>> = HashMap::new();
        for &(parent, child) in &self.edges {
            in_degree[child] += 1;
            successors.entry(parent).or_default().push(child);
        }

        let mut queue: VecDeque<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, &d)| d == 0)
            .map(|(i, _)| i)
            .collect();

        let mut visited = 0usize;
        while let Some(current) = queue.pop_front() {
            visited += 1;
            if let Some(children) = successors.get(&current) {
                for &child in children {
                    in_degree[child] -= 1;
                    if in_degree[child] == 0 {
                        queue.push_back(child);
                    }
                }
            }
        }

        if visited != self.jobs.len() {
            return Err(GenError::CyclicDependency);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_dedup() {
        let mut dax = Adag::new("test");
        assert!(dax.add_file(FileNode::new("peg/registry.sqlite3")));
        assert!(!dax.add_file(FileNode::new("peg/registry.sqlite3")));
        assert_eq!(dax.file_count(), 1);
        assert!(dax.has_file("peg/registry.sqlite3"));
        assert!(!dax.has_file("peg/other"));
    }

    #[test]
    fn test_first_registration_wins() {
        let mut dax = Adag::new("test");
        dax.add_file(FileNode::new("f").with_pfn("/repo/f", "local"));
        dax.add_file(FileNode::new("f").with_pfn("/other/f", "local"));
        assert_eq!(dax.file("f").unwrap().pfns[0].url, "/repo/f");
    }

    #[test]
    fn test_job_uses_dedup() {
        let job = Job::new("processCcd")
            .input("peg/registry.sqlite3")
            .input("peg/registry.sqlite3")
            .output("peg/corr/CORR-0903334-016.fits");

        assert_eq!(job.inputs().count(), 1);
        assert_eq!(job.outputs().count(), 1);
    }

    #[test]
    fn test_job_stderr_is_output() {
        let job = Job::new("makeSkyMap").stderr("logMakeSkyMap");
        assert_eq!(job.stderr_file(), Some("logMakeSkyMap"));
        assert!(job.outputs().any(|lfn| lfn == "logMakeSkyMap"));
    }

    #[test]
    fn test_job_id_format() {
        assert_eq!(JobId(0).to_string(), "ID0000001");
        assert_eq!(JobId(41).to_string(), "ID0000042");
    }

    #[test]
    fn test_infer_dependencies_chain() {
        let mut dax = Adag::new("test");
        for lfn in ["a", "b", "c"] {
            dax.add_file(FileNode::new(lfn));
        }
        let j1 = dax.add_job(Job::new("one").output("a"));
        let j2 = dax.add_job(Job::new("two").input("a").output("b"));
        let j3 = dax.add_job(Job::new("three").input("b").output("c"));

        dax.infer_file_dependencies().unwrap();

        let edges: Vec<_> = dax.edges().collect();
        assert!(edges.contains(&(j1, j2)));
        assert!(edges.contains(&(j2, j3)));
        assert_eq!(edges.len(), 2);
        assert!(dax.validate().is_ok());
    }

    #[test]
    fn test_infer_dependencies_shared_input() {
        let mut dax = Adag::new("test");
        for lfn in ["calib", "out1", "out2"] {
            dax.add_file(FileNode::new(lfn));
        }
        let maker = dax.add_job(Job::new("makeCalib").output("calib"));
        let user1 = dax.add_job(Job::new("use1").input("calib").output("out1"));
        let user2 = dax.add_job(Job::new("use2").input("calib").output("out2"));

        dax.infer_file_dependencies().unwrap();
        let edges: Vec<_> = dax.edges().collect();
        assert!(edges.contains(&(maker, user1)));
        assert!(edges.contains(&(maker, user2)));
    }

    #[test]
    fn test_duplicate_producer_rejected() {
        let mut dax = Adag::new("test");
        dax.add_file(FileNode::new("x"));
        dax.add_job(Job::new("one").output("x"));
        dax.add_job(Job::new("two").output("x"));

        let err = dax.infer_file_dependencies().unwrap_err();
        assert!(matches!(err, GenError::DuplicateProducer(_)));
    }

    #[test]
    fn test_validate_unregistered_file() {
        let mut dax = Adag::new("test");
        dax.add_job(Job::new("one").input("ghost"));
        let err = dax.validate().unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_validate_cycle() {
        let mut dax = Adag::new("test");
        let j1 = dax.add_job(Job::new("one"));
        let j2 = dax.add_job(Job::new("two"));
        dax.depends(j1, j2);
        dax.depends(j2, j1);

        let err = dax.validate().unwrap_err();
        assert!(matches!(err, GenError::CyclicDependency));
    }

    #[test]
    fn test_depends_dedup_and_self_edge() {
        let mut dax = Adag::new("test");
        let j1 = dax.add_job(Job::new("one"));
        let j2 = dax.add_job(Job::new("two"));
        dax.depends(j1, j2);
        dax.depends(j1, j2);
        dax.depends(j1, j1);
        assert_eq!(dax.edges().count(), 1);
    }

    #[test]
    fn test_empty_graph_validates() {
        let dax = Adag::new("empty");
        assert!(dax.validate().is_ok());
        assert_eq!(dax.job_count(), 0);
        assert_eq!(dax.file_count(), 0);
    }
}
