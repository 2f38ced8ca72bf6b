//! # Version Control
//!
//! Checkouts are driven through the [`Vcs`] trait so the checkout task does
//! not care which tool is behind it. Queries (which repository a working copy
//! comes from) run even in simulate mode; everything that changes the working
//! copy goes through [`Maker::run_command`].

use crate::core::conflict::{CheckoutConflict, CheckoutDecision};
use crate::core::maker::{Maker, MakerError, Outcome};
use crate::system::executor::{CommandSpec, ExecutionError};
use lazy_static::lazy_static;
use regex::Regex;
use std::fmt;
use std::path::Path;
use thiserror::Error;

lazy_static! {
    static ref SVN_URL_RE: Regex = Regex::new(r"(?m)^URL:\s+(.*?)\s*$").unwrap();
}

#[derive(Error, Debug)]
pub enum VcsError {
    #[error(transparent)]
    Maker(#[from] MakerError),
    #[error("Could not query working copy: {0}")]
    Query(#[from] ExecutionError),
    #[error("Unknown version control system '{0}' (expected 'git' or 'svn')")]
    UnknownKind(String),
}

pub trait Vcs: fmt::Debug {
    fn name(&self) -> &'static str;

    /// The repository the working copy at `path` was checked out from,
    /// or `None` when `path` is not a working copy.
    fn upstream_url(&self, maker: &Maker, path: &Path) -> Result<Option<String>, VcsError>;

    fn checkout(
        &self,
        maker: &mut Maker,
        url: &str,
        dest: &Path,
        revision: Option<&str>,
    ) -> Result<(), VcsError>;

    fn update(&self, maker: &mut Maker, dest: &Path, revision: Option<&str>)
    -> Result<(), VcsError>;

    /// Points an existing working copy at another repository.
    fn switch(&self, maker: &mut Maker, dest: &Path, url: &str) -> Result<(), VcsError>;

    /// Schedules a new path for addition. Tools that do not track
    /// directories leave this as a no-op.
    fn add(&self, _maker: &mut Maker, _path: &Path) -> Result<(), VcsError> {
        Ok(())
    }
}

/// Looks up a version control backend by name.
pub fn vcs_for(kind: &str) -> Result<Box<dyn Vcs>, VcsError> {
    match kind.trim().to_ascii_lowercase().as_str() {
        "git" => Ok(Box::new(Git)),
        "svn" | "subversion" => Ok(Box::new(Subversion)),
        other => Err(VcsError::UnknownKind(other.to_string())),
    }
}

fn path_arg(path: &Path) -> String {
    path.display().to_string()
}

// --- Subversion ---

#[derive(Debug, Default, Clone, Copy)]
pub struct Subversion;

impl Vcs for Subversion {
    fn name(&self) -> &'static str {
        "svn"
    }

    fn upstream_url(&self, maker: &Maker, path: &Path) -> Result<Option<String>, VcsError> {
        let spec = CommandSpec::new(["svn".to_string(), "info".to_string(), path_arg(path)]);
        match maker.query(&spec) {
            Ok(output) => Ok(SVN_URL_RE
                .captures(&output.stdout)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().to_string())),
            Err(e) if e.stderr().is_some_and(|s| s.contains("is not a working copy")) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn checkout(
        &self,
        maker: &mut Maker,
        url: &str,
        dest: &Path,
        revision: Option<&str>,
    ) -> Result<(), VcsError> {
        let mut argv = vec!["svn".to_string(), "checkout".to_string()];
        if let Some(rev) = revision {
            argv.extend(["-r".to_string(), rev.to_string()]);
        }
        argv.extend([url.to_string(), path_arg(dest)]);
        maker.run_command(&CommandSpec::new(argv))?;
        Ok(())
    }

    fn update(
        &self,
        maker: &mut Maker,
        dest: &Path,
        revision: Option<&str>,
    ) -> Result<(), VcsError> {
        let mut argv = vec!["svn".to_string(), "update".to_string()];
        if let Some(rev) = revision {
            argv.extend(["-r".to_string(), rev.to_string()]);
        }
        argv.push(path_arg(dest));
        maker.run_command(&CommandSpec::new(argv))?;
        Ok(())
    }

    fn switch(&self, maker: &mut Maker, dest: &Path, url: &str) -> Result<(), VcsError> {
        maker.run_command(&CommandSpec::new([
            "svn".to_string(),
            "switch".to_string(),
            url.to_string(),
            path_arg(dest),
        ]))?;
        Ok(())
    }

    fn add(&self, maker: &mut Maker, path: &Path) -> Result<(), VcsError> {
        maker.run_command(&CommandSpec::new([
            "svn".to_string(),
            "add".to_string(),
            path_arg(path),
        ]))?;
        Ok(())
    }
}

// --- Git ---

#[derive(Debug, Default, Clone, Copy)]
pub struct Git;

impl Git {
    fn in_repo<I: IntoIterator<Item = &'static str>>(dest: &Path, args: I) -> CommandSpec {
        let mut argv = vec!["git".to_string(), "-C".to_string(), path_arg(dest)];
        argv.extend(args.into_iter().map(str::to_string));
        CommandSpec::new(argv)
    }
}

impl Vcs for Git {
    fn name(&self) -> &'static str {
        "git"
    }

    fn upstream_url(&self, maker: &Maker, path: &Path) -> Result<Option<String>, VcsError> {
        if !path.join(".git").exists() {
            return Ok(None);
        }
        // `git config --get` exits with 1 when the key is unset.
        let spec = Self::in_repo(path, ["config", "--get", "remote.origin.url"]).accept(1);
        let output = maker.query(&spec)?;
        let url = output.stdout.trim();
        Ok((!url.is_empty()).then(|| url.to_string()))
    }

    fn checkout(
        &self,
        maker: &mut Maker,
        url: &str,
        dest: &Path,
        revision: Option<&str>,
    ) -> Result<(), VcsError> {
        maker.run_command(&CommandSpec::new([
            "git".to_string(),
            "clone".to_string(),
            url.to_string(),
            path_arg(dest),
        ]))?;
        if let Some(rev) = revision {
            let mut spec = Self::in_repo(dest, ["checkout", "--quiet"]);
            spec.argv.push(rev.to_string());
            maker.run_command(&spec)?;
        }
        Ok(())
    }

    fn update(
        &self,
        maker: &mut Maker,
        dest: &Path,
        revision: Option<&str>,
    ) -> Result<(), VcsError> {
        match revision {
            Some(rev) => {
                maker.run_command(&Self::in_repo(dest, ["fetch", "origin"]))?;
                let mut spec = Self::in_repo(dest, ["checkout", "--quiet"]);
                spec.argv.push(rev.to_string());
                maker.run_command(&spec)?;
            }
            None => {
                maker.run_command(&Self::in_repo(dest, ["pull", "--ff-only"]))?;
            }
        }
        Ok(())
    }

    fn switch(&self, maker: &mut Maker, dest: &Path, url: &str) -> Result<(), VcsError> {
        let mut spec = Self::in_repo(dest, ["remote", "set-url", "origin"]);
        spec.argv.push(url.to_string());
        maker.run_command(&spec)?;
        Ok(())
    }
}

fn is_empty_dir(path: &Path) -> bool {
    std::fs::read_dir(path).is_ok_and(|mut entries| entries.next().is_none())
}

/// Checks out `url` into `dest`, or brings an existing working copy up to date.
///
/// A working copy from a different repository is a conflict handed to the
/// maker's resolver; in quick mode existing working copies are left alone. A
/// directory that is not a working copy has no upstream to compare and is
/// updated in place.
pub fn checkout_or_update(
    maker: &mut Maker,
    vcs: &dyn Vcs,
    url: &str,
    dest: &Path,
    revision: Option<&str>,
) -> Result<Outcome, VcsError> {
    let dest = maker.path(dest);
    let shown = maker.display_path(&dest);

    if maker.exists(&dest) && !is_empty_dir(&dest) {
        if maker.quick() {
            maker
                .log()
                .notify(format!("Checkout {shown} exists; skipping update"));
            return Ok(Outcome::Unchanged);
        }
        match vcs.upstream_url(maker, &dest)? {
            None => maker.log().debug(format!(
                "{shown} is not a {} working copy; nothing to compare",
                vcs.name()
            )),
            Some(current) => {
                maker
                    .log()
                    .debug(format!("There is a {} checkout at {shown} from {current}", vcs.name()));

                if current != url {
                    let conflict = CheckoutConflict {
                        dest: dest.clone(),
                        current_url: current,
                        expected_url: url.to_string(),
                    };
                    if maker.simulate() {
                        maker.log().notify(format!(
                            "Would ask what to do with the checkout at {shown} (from {})",
                            conflict.current_url
                        ));
                        return Ok(Outcome::Skipped);
                    }
                    match maker
                        .resolver_mut()
                        .resolve_checkout(&conflict)
                        .map_err(MakerError::from)?
                    {
                        CheckoutDecision::Ignore => {
                            maker
                                .log()
                                .warn(format!("Ignoring repository differences at {shown}"));
                        }
                        CheckoutDecision::Switch => {
                            maker
                                .log()
                                .warn(format!("Switching {shown} to {url}"));
                            vcs.switch(maker, &dest, url)?;
                        }
                        CheckoutDecision::Backup => {
                            maker.move_to_backup(&dest)?;
                        }
                        CheckoutDecision::Wipe => {
                            maker.log().warn(format!("Deleting checkout {shown}"));
                            maker.rmtree(&dest)?;
                        }
                    }
                }
            }
        }
    }

    if maker.exists(&dest) && !is_empty_dir(&dest) {
        vcs.update(maker, &dest, revision)?;
        maker
            .log()
            .notify(format!("Updated repository at {shown}"));
        Ok(Outcome::Updated)
    } else {
        if let Some(parent) = dest.parent() {
            maker.ensure_dir(parent)?;
        }
        vcs.checkout(maker, url, &dest, revision)?;
        maker
            .log()
            .notify(format!("Checked out {url} to {shown}"));
        Ok(Outcome::Created)
    }
}
