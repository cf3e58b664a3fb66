use crate::{
    BenchmarkSpec, HarnessError, ProblemInstance, CANONICAL_DOMAIN_FILE, DOMAIN_EXTENSION,
    DOMAIN_KEYWORD, DOMAIN_SUFFIX, PROBLEM_EXTENSIONS,
};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Planning files found in one benchmark directory, split by role.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateSet {
    pub directory: PathBuf,
    pub domains: Vec<String>,
    /// Sorted lexicographically.
    pub problems: Vec<String>,
}

impl CandidateSet {
    pub fn sampled(&self, cap: usize) -> &[String] {
        &self.problems[..cap.min(self.problems.len())]
    }

    fn domain_for(&self, problem: &str) -> Option<&str> {
        if self.has_domain(CANONICAL_DOMAIN_FILE) {
            return Some(CANONICAL_DOMAIN_FILE);
        }
        let stem = problem.split('.').next().unwrap_or(problem);
        let derived = format!("{}{}", stem, DOMAIN_SUFFIX);
        self.domains
            .iter()
            .find(|name| **name == derived)
            .map(String::as_str)
    }

    fn has_domain(&self, name: &str) -> bool {
        self.domains.iter().any(|candidate| candidate == name)
    }
}

pub fn list_candidates(directory: &Path) -> Result<CandidateSet, HarnessError> {
    let list_err = |source| HarnessError::ListBenchmark {
        path: directory.to_path_buf(),
        source,
    };
    let directory = directory.canonicalize().map_err(list_err)?;
    let mut names = Vec::new();
    for entry in fs::read_dir(&directory).map_err(list_err)? {
        let entry = entry.map_err(list_err)?;
        if !entry.path().is_file() {
            continue;
        }
        let file_name = entry.file_name();
        let planning_file = Path::new(&file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| PROBLEM_EXTENSIONS.contains(&ext));
        if !planning_file {
            continue;
        }
        // Skipping it would shift the sampled prefix.
        let name = file_name.into_string().map_err(|raw| {
            list_err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("file name {:?} is not valid UTF-8", raw),
            ))
        })?;
        names.push(name);
    }
    names.sort();

    let mut candidates = CandidateSet {
        directory,
        ..CandidateSet::default()
    };
    for name in names {
        if name.to_lowercase().contains(DOMAIN_KEYWORD) {
            if extension_of(&name) == Some(DOMAIN_EXTENSION) {
                candidates.domains.push(name);
            }
        } else {
            candidates.problems.push(name);
        }
    }
    Ok(candidates)
}

/// Resolves the sampled prefix of a benchmark's problems to absolute
/// (domain, problem) pairs. A single missing domain fails the whole benchmark.
pub fn resolve_instances(spec: &BenchmarkSpec) -> Result<Vec<ProblemInstance>, HarnessError> {
    let candidates = list_candidates(&spec.directory)?;
    candidates
        .sampled(spec.instance_cap)
        .iter()
        .map(|problem| {
            let domain =
                candidates
                    .domain_for(problem)
                    .ok_or_else(|| HarnessError::DomainNotFound {
                        benchmark: spec.name(),
                        problem: problem.clone(),
                    })?;
            Ok(ProblemInstance {
                domain_file: candidates.directory.join(domain),
                problem_file: candidates.directory.join(problem),
            })
        })
        .collect()
}

fn extension_of(name: &str) -> Option<&str> {
    Path::new(name).extension().and_then(|ext| ext.to_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    struct TempDirGuard {
        path: PathBuf,
    }

    impl TempDirGuard {
        fn new(prefix: &str) -> Self {
            let path = std::env::temp_dir().join(format!(
                "{}_{}_{}",
                prefix,
                std::process::id(),
                Utc::now().timestamp_micros()
            ));
            fs::create_dir_all(&path).expect("temp dir");
            Self { path }
        }

        fn touch(&self, names: &[&str]) {
            for name in names {
                fs::write(self.path.join(name), "(define)").expect("write fixture");
            }
        }
    }

    impl Drop for TempDirGuard {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.path);
        }
    }

    #[test]
    fn partitions_domains_and_problems_and_ignores_other_files() {
        let root = TempDirGuard::new("plancheck_partition");
        root.touch(&[
            "p02.hddl",
            "p01.pddl",
            "Domain.hddl",
            "extra-domain.pddl",
            "README.md",
            "notes.txt",
        ]);
        fs::create_dir_all(root.path.join("nested.hddl")).expect("nested dir");

        let candidates = list_candidates(&root.path).expect("candidates");
        assert_eq!(candidates.domains, vec!["Domain.hddl".to_string()]);
        assert_eq!(
            candidates.problems,
            vec!["p01.pddl".to_string(), "p02.hddl".to_string()]
        );
        assert!(candidates.directory.is_absolute());
    }

    #[test]
    fn canonical_domain_is_preferred() {
        let root = TempDirGuard::new("plancheck_canonical");
        root.touch(&["domain.hddl", "p01.hddl", "p01-domain.hddl"]);

        let instances =
            resolve_instances(&BenchmarkSpec::new(&root.path, 5)).expect("resolve");
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].domain_name(), "domain.hddl");
        assert_eq!(instances[0].problem_name(), "p01.hddl");
    }

    #[test]
    fn falls_back_to_problem_specific_domain() {
        let root = TempDirGuard::new("plancheck_per_problem_domain");
        root.touch(&["foo.pddl", "foo-domain.hddl", "bar.pddl", "bar-domain.hddl"]);

        let instances =
            resolve_instances(&BenchmarkSpec::new(&root.path, 5)).expect("resolve");
        let pairs: Vec<(String, String)> = instances
            .iter()
            .map(|inst| (inst.problem_name(), inst.domain_name()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("bar.pddl".to_string(), "bar-domain.hddl".to_string()),
                ("foo.pddl".to_string(), "foo-domain.hddl".to_string()),
            ]
        );
    }

    #[test]
    fn derived_domain_uses_name_up_to_first_dot() {
        let root = TempDirGuard::new("plancheck_first_dot");
        root.touch(&["p01.v2.hddl", "p01-domain.hddl"]);

        let instances =
            resolve_instances(&BenchmarkSpec::new(&root.path, 1)).expect("resolve");
        assert_eq!(instances[0].domain_name(), "p01-domain.hddl");
    }

    #[test]
    fn missing_domain_fails_resolution() {
        let root = TempDirGuard::new("plancheck_missing_domain");
        root.touch(&["foo.pddl", "other-domain.hddl"]);

        let err = resolve_instances(&BenchmarkSpec::new(&root.path, 5))
            .expect_err("resolution should fail");
        match err {
            HarnessError::DomainNotFound { problem, .. } => assert_eq!(problem, "foo.pddl"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn domain_with_pddl_extension_is_not_a_candidate() {
        let root = TempDirGuard::new("plancheck_pddl_domain");
        root.touch(&["foo.pddl", "foo-domain.pddl"]);

        assert!(matches!(
            resolve_instances(&BenchmarkSpec::new(&root.path, 5)),
            Err(HarnessError::DomainNotFound { .. })
        ));
    }

    #[test]
    fn samples_only_the_first_k_sorted_problems() {
        let root = TempDirGuard::new("plancheck_sampling");
        root.touch(&[
            "domain.hddl",
            "p05.hddl",
            "p01.hddl",
            "p04.hddl",
            "p02.hddl",
            "p03.hddl",
        ]);

        let instances =
            resolve_instances(&BenchmarkSpec::new(&root.path, 3)).expect("resolve");
        let names: Vec<String> = instances.iter().map(ProblemInstance::problem_name).collect();
        assert_eq!(names, vec!["p01.hddl", "p02.hddl", "p03.hddl"]);
    }

    #[test]
    fn cap_larger_than_available_keeps_everything() {
        let root = TempDirGuard::new("plancheck_cap_large");
        root.touch(&["domain.hddl", "p01.hddl", "p02.hddl"]);

        let instances =
            resolve_instances(&BenchmarkSpec::new(&root.path, 20)).expect("resolve");
        assert_eq!(instances.len(), 2);
        assert!(resolve_instances(&BenchmarkSpec::new(&root.path, 0))
            .expect("resolve")
            .is_empty());
    }

    #[test]
    fn unsampled_problems_do_not_need_a_domain() {
        let root = TempDirGuard::new("plancheck_unsampled");
        root.touch(&["a.pddl", "a-domain.hddl", "b.pddl"]);

        let instances =
            resolve_instances(&BenchmarkSpec::new(&root.path, 1)).expect("resolve");
        assert_eq!(instances.len(), 1);
    }

    #[test]
    fn missing_directory_is_a_listing_error() {
        let root = TempDirGuard::new("plancheck_missing_dir");
        let err = list_candidates(&root.path.join("absent")).expect_err("should fail");
        assert!(matches!(err, HarnessError::ListBenchmark { .. }));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn non_utf8_planning_file_fails_the_listing() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let root = TempDirGuard::new("plancheck_non_utf8");
        root.touch(&["domain.hddl", "p01.hddl"]);
        fs::write(root.path.join(OsStr::from_bytes(b"p\xff.hddl")), "(define)")
            .expect("write fixture");
        fs::write(root.path.join(OsStr::from_bytes(b"notes\xff.txt")), "")
            .expect("write fixture");

        let err = list_candidates(&root.path).expect_err("should fail");
        match err {
            HarnessError::ListBenchmark { source, .. } => {
                assert_eq!(source.kind(), io::ErrorKind::InvalidData)
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
