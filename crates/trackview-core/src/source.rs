//! Run source descriptions and links to the commit that produced a run.

use once_cell::sync::Lazy;
use regex_lite::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::format::{base_name, drop_extension};
use crate::tags::{RunTagKey, RunTags};

pub const PROJECT_SOURCE_TYPE: &str = "PROJECT";
pub const JOB_SOURCE_TYPE: &str = "JOB";
pub const NOTEBOOK_SOURCE_TYPE: &str = "NOTEBOOK";
pub const DEFAULT_ENTRY_POINT: &str = "main";
pub const SHORT_COMMIT_LEN: usize = 6;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum GitHost {
    GitHub,
    GitLab,
    Bitbucket,
}

impl GitHost {
    pub const ALL: [Self; 3] = [Self::GitHub, Self::GitLab, Self::Bitbucket];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GitHub => "github.com",
            Self::GitLab => "gitlab.com",
            Self::Bitbucket => "bitbucket.org",
        }
    }

    fn tree_segment(self) -> &'static str {
        match self {
            Self::GitHub | Self::GitLab => "tree",
            Self::Bitbucket => "src",
        }
    }
}

static GIT_REPO_PATTERNS: Lazy<Vec<(GitHost, Regex)>> = Lazy::new(|| {
    GitHost::ALL
        .into_iter()
        .filter_map(|host| {
            let pattern =
                format!(r"[@/]{}[:/]([^/.]+)/([^/#]+)#?(.*)", regex_lite::escape(host.as_str()));
            Regex::new(&pattern).ok().map(|regex| (host, regex))
        })
        .collect()
});

/// Repository named by a source, plus the subdirectory after `#` if any.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct GitRepo {
    pub host: GitHost,
    pub owner: String,
    pub name: String,
    pub subdirectory: String,
}

impl GitRepo {
    fn base_url(&self) -> String {
        format!("https://{}/{}/{}", self.host.as_str(), self.owner, self.name)
    }
}

/// Find a GitHub, GitLab or Bitbucket repository in an https or ssh source name.
#[must_use]
pub fn parse_git_repo(source_name: &str) -> Option<GitRepo> {
    GIT_REPO_PATTERNS.iter().find_map(|(host, pattern)| {
        let captures = pattern.captures(source_name)?;
        let group = |captures: &Captures<'_>, index| {
            captures.get(index).map_or_else(String::new, |found| found.as_str().to_string())
        };
        let name = group(&captures, 2);
        Some(GitRepo {
            host: *host,
            owner: group(&captures, 1),
            name: name.strip_suffix(".git").unwrap_or(&name).to_string(),
            subdirectory: group(&captures, 3),
        })
    })
}

/// Browsable URL of a source's repository on its default branch.
#[must_use]
pub fn git_repo_url(source_name: &str) -> Option<String> {
    let repo = parse_git_repo(source_name)?;
    let url = repo.base_url();
    if repo.subdirectory.is_empty() {
        return Some(url);
    }
    Some(format!("{url}/{}/master/{}", repo.host.tree_segment(), repo.subdirectory))
}

/// Browsable URL of a source's repository at `commit`.
#[must_use]
pub fn git_commit_url(source_name: &str, commit: &str) -> Option<String> {
    let repo = parse_git_repo(source_name)?;
    Some(format!(
        "{}/{}/{commit}/{}",
        repo.base_url(),
        repo.host.tree_segment(),
        repo.subdirectory
    ))
}

/// Short label for where a run came from.
#[must_use]
pub fn format_source(tags: &RunTags) -> String {
    let source_name = tags.source_name();
    match tags.source_type() {
        PROJECT_SOURCE_TYPE => {
            let mut label = drop_extension(base_name(source_name));
            match tags.entry_point_name() {
                "" | DEFAULT_ENTRY_POINT => {}
                entry_point => {
                    label.push(':');
                    label.push_str(entry_point);
                }
            }
            label
        }
        JOB_SOURCE_TYPE => {
            match (non_empty(tags.get(RunTagKey::JobId)), non_empty(tags.get(RunTagKey::JobRunId))) {
                (Some(job_id), Some(job_run_id)) => format!("run {job_run_id} of job {job_id}"),
                _ => source_name.to_string(),
            }
        }
        _ => base_name(source_name).to_string(),
    }
}

/// Where a run came from, as a label and, when the source has a page, a link to it.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct SourceLink {
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Link for a run's source.
///
/// Project runs link to their repository. Notebook and job runs link to a
/// `#notebook/...` or `#job/...` fragment appended to `base_url`, which is the
/// hosting page's origin with its query already applied; an empty `base_url`
/// yields a bare fragment.
#[must_use]
pub fn render_source(tags: &RunTags, base_url: &str, run_uuid: &str) -> SourceLink {
    let source_name = tags.source_name();
    match tags.source_type() {
        PROJECT_SOURCE_TYPE => SourceLink {
            label: format_source(tags),
            title: None,
            url: git_repo_url(source_name),
        },
        NOTEBOOK_SOURCE_TYPE => {
            let label = base_name(source_name).to_string();
            match non_empty(tags.get(RunTagKey::NotebookId)) {
                Some(notebook_id) => {
                    let mut url = format!("{base_url}#notebook/{notebook_id}");
                    if let Some(revision_id) = non_empty(tags.get(RunTagKey::NotebookRevisionId)) {
                        url.push_str("/revision/");
                        url.push_str(revision_id);
                        if !run_uuid.is_empty() {
                            url.push_str("/mlflow/run/");
                            url.push_str(run_uuid);
                        }
                    }
                    SourceLink { label, title: Some(source_name.to_string()), url: Some(url) }
                }
                None => SourceLink { label, title: None, url: None },
            }
        }
        JOB_SOURCE_TYPE => {
            let job_name = format_source(tags);
            let Some(job_id) = non_empty(tags.get(RunTagKey::JobId)) else {
                return SourceLink { label: job_name, title: None, url: None };
            };
            let job_run_id = non_empty(tags.get(RunTagKey::JobRunId));
            let label = match (job_name.is_empty(), job_run_id) {
                (false, _) => job_name,
                (true, Some(job_run_id)) => format!("run {job_run_id} of job {job_id}"),
                (true, None) => format!("job {job_id}"),
            };
            let url = match job_run_id {
                Some(job_run_id) => format!("{base_url}#job/{job_id}/run/{job_run_id}"),
                None => format!("{base_url}#job/{job_id}"),
            };
            SourceLink { title: Some(label.clone()), label, url: Some(url) }
        }
        _ => SourceLink { label: format_source(tags), title: None, url: None },
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|value| !value.is_empty())
}

/// Commit label of a run, linked to the commit page for project runs.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct VersionLink {
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// The run's source commit, shortened to `short_len` characters when given.
/// `None` when the run recorded no commit.
#[must_use]
pub fn render_version(tags: &RunTags, short_len: Option<usize>) -> Option<VersionLink> {
    let commit = tags.source_version();
    if commit.is_empty() {
        return None;
    }
    let label = match short_len {
        Some(len) => commit.chars().take(len).collect(),
        None => commit.to_string(),
    };
    let url = (tags.source_type() == PROJECT_SOURCE_TYPE)
        .then(|| git_commit_url(tags.source_name(), commit))
        .flatten();
    Some(VersionLink { label, url })
}
