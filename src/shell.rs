//! Interactive restore shell over the virtual filesystem.
//!
//! The line editor owns the terminal: raw mode is entered for each prompt
//! and restored before a command body runs, so restore output prints on a
//! cooked terminal. Control-C interrupts the read and exits the process;
//! TAB lands in the completer below.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use anyhow::{bail, Error};
use futures::TryStreamExt;
use log::warn;
use rustyline::completion::{Completer, Pair};
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::{CompletionType, Config, Context, Editor, Helper};
use tokio::runtime::Handle;

use crate::chunk::{read_manifest, Chunk};
use crate::restore::Restorer;
use crate::store::BlobStore;
use crate::vfs::{NodeId, Vfs};

/// Directory restores descend at most this many levels.
pub const MAX_RESTORE_DEPTH: usize = 1023;

struct ShellState {
    vfs: Vfs,
    pwd: NodeId,
}

#[derive(Clone)]
struct Shell {
    rt: Handle,
    store: Arc<dyn BlobStore>,
    state: Rc<RefCell<ShellState>>,
    chown: bool,
}

struct Command {
    name: &'static str,
    min_args: usize,
    max_args: usize,
    usage: &'static str,
    run: fn(&Shell, &[&str]) -> Result<(), Error>,
}

const COMMANDS: &[Command] = &[
    Command {
        name: "ls",
        min_args: 0,
        max_args: 0,
        usage: "ls ; List current directory",
        run: Shell::cmd_ls,
    },
    Command {
        name: "cd",
        min_args: 1,
        max_args: 1,
        usage: "cd dir ; Change directory",
        run: Shell::cmd_cd,
    },
    Command {
        name: "restore",
        min_args: 1,
        max_args: 1,
        usage: "restore target ; Restore a file or directory",
        run: Shell::cmd_restore,
    },
];

/// Run the interactive loop until `exit` or end of input. Fatal if stdin is
/// not a terminal.
pub fn run_shell(rt: Handle, store: Arc<dyn BlobStore>, chown: bool) -> Result<(), Error> {
    if !nix::unistd::isatty(0).unwrap_or(false) {
        bail!("stdin is not a terminal");
    }

    let mut vfs = Vfs::new();
    let root = vfs.root();
    let keys: Vec<String> = rt.block_on(async {
        let stream = store.list_prefix("/metadata").await?;
        stream.try_collect().await
    })?;
    for key in keys {
        // /metadata/<host>/<stamp>/backup.json -> directory /<host>/<stamp>/
        let dir_path = match key
            .strip_prefix("/metadata")
            .and_then(|rest| rest.strip_suffix("backup.json"))
        {
            Some(dir_path) => dir_path.to_owned(),
            None => continue,
        };
        let id = vfs.insert_path(root, &dir_path)?;
        vfs.set_loader(id, key);
    }

    let shell = Shell {
        rt,
        store,
        state: Rc::new(RefCell::new(ShellState { vfs, pwd: root })),
        chown,
    };

    let config = Config::builder().completion_type(CompletionType::List).build();
    let mut editor = Editor::<ShellHelper>::with_config(config);
    editor.set_helper(Some(ShellHelper { shell: shell.clone() }));

    loop {
        let line = match editor.readline("> ") {
            Ok(line) => line,
            // the editor restored the terminal before returning
            Err(ReadlineError::Interrupted) => std::process::exit(1),
            Err(ReadlineError::Eof) => break,
            Err(err) => return Err(err.into()),
        };
        if line == "exit" {
            break;
        }
        if line.is_empty() {
            continue;
        }
        shell.dispatch(&line)?;
    }
    Ok(())
}

impl Shell {
    fn dispatch(&self, line: &str) -> Result<(), Error> {
        let parts: Vec<&str> = line.split(' ').collect();
        let command = match COMMANDS.iter().find(|command| command.name == parts[0]) {
            Some(command) => command,
            None => {
                println!("Unknown command {}", parts[0]);
                return Ok(());
            }
        };
        let num_args = parts.len() - 1;
        if num_args < command.min_args || num_args > command.max_args {
            println!("{}", command.usage);
            return Ok(());
        }
        (command.run)(self, &parts)
    }

    /// Fire the directory's one-shot manifest loader if it is still
    /// pending.
    fn ensure_loaded(&self, id: NodeId) -> Result<(), Error> {
        let pending = self.state.borrow_mut().vfs.take_loader(id);
        if let Some(key) = pending {
            let chunks = self.rt.block_on(read_manifest(&*self.store, &key))?;
            let mut state = self.state.borrow_mut();
            for chunk in chunks {
                state.vfs.insert_record(id, chunk)?;
            }
        }
        Ok(())
    }

    fn cmd_ls(&self, _args: &[&str]) -> Result<(), Error> {
        let pwd = self.state.borrow().pwd;
        self.ensure_loaded(pwd)?;

        let state = self.state.borrow();
        let mut line = String::new();
        for (name, id) in state.vfs.children(pwd) {
            let formatted = if state.vfs.is_dir(id) { format!("{}/", name) } else { name };
            if line.len() + formatted.len() + 1 >= 80 {
                println!("{}", line.trim_end());
                line.clear();
            }
            line.push_str(&formatted);
            line.push(' ');
        }
        if !line.is_empty() {
            println!("{}", line.trim_end());
        }
        Ok(())
    }

    fn cmd_cd(&self, args: &[&str]) -> Result<(), Error> {
        let target = {
            let state = self.state.borrow();
            state
                .vfs
                .child(state.pwd, args[1])
                .filter(|id| state.vfs.is_dir(*id))
        };
        match target {
            Some(id) => {
                self.state.borrow_mut().pwd = id;
                self.ensure_loaded(id)?;
            }
            None => println!("Error changing to {}", args[1]),
        }
        Ok(())
    }

    fn cmd_restore(&self, args: &[&str]) -> Result<(), Error> {
        let pwd = self.state.borrow().pwd;
        self.ensure_loaded(pwd)?;

        let target = {
            let state = self.state.borrow();
            state.vfs.child(pwd, args[1])
        };
        let target = match target {
            Some(target) => target,
            None => {
                println!("Failed to open {}", args[1]);
                return Ok(());
            }
        };

        let restorer = Restorer::new(Arc::clone(&self.store), self.chown);
        let file_chunks = self.state.borrow().vfs.chunks(target).map(|chunks| chunks.to_vec());
        match file_chunks {
            Some(chunks) => self.rt.block_on(restorer.restore_file(&chunks))?,
            None => {
                let mut files = Vec::new();
                self.collect_files(target, MAX_RESTORE_DEPTH, &mut files)?;
                self.rt.block_on(restorer.restore_many(files))?;
            }
        }
        Ok(())
    }

    /// Depth-limited walk collecting the chunk sets of every file below
    /// `dir`, firing manifest loaders along the way.
    fn collect_files(&self, dir: NodeId, depth: usize, out: &mut Vec<Vec<Chunk>>) -> Result<(), Error> {
        self.ensure_loaded(dir)?;

        let entries = self.state.borrow().vfs.children(dir);
        let mut subdirs = Vec::new();
        for (_, id) in entries {
            let chunks = self.state.borrow().vfs.chunks(id).map(|chunks| chunks.to_vec());
            match chunks {
                Some(chunks) => out.push(chunks),
                None => subdirs.push(id),
            }
        }
        if depth == 1 {
            return Ok(());
        }
        for id in subdirs {
            self.collect_files(id, depth - 1, out)?;
        }
        Ok(())
    }

    /// Names in the current directory, for completion.
    fn completion_names(&self) -> Result<Vec<String>, Error> {
        let pwd = self.state.borrow().pwd;
        self.ensure_loaded(pwd)?;
        Ok(self
            .state
            .borrow()
            .vfs
            .children(pwd)
            .into_iter()
            .map(|(name, _)| name)
            .collect())
    }
}

/// Maximal string every candidate begins with.
pub fn longest_common_prefix(candidates: &[&str]) -> String {
    let first = match candidates.first() {
        Some(first) => *first,
        None => return String::new(),
    };
    let mut prefix = "";
    for (i, c) in first.char_indices() {
        let candidate = &first[..i + c.len_utf8()];
        if candidates[1..].iter().all(|s| s.starts_with(candidate)) {
            prefix = candidate;
        } else {
            break;
        }
    }
    prefix.to_string()
}

struct ShellHelper {
    shell: Shell,
}

impl Completer for ShellHelper {
    type Candidate = Pair;

    fn complete(&self, line: &str, pos: usize, _ctx: &Context<'_>) -> rustyline::Result<(usize, Vec<Pair>)> {
        let parts: Vec<&str> = line.split(' ').collect();
        if parts.len() != 2 || !(parts[0] == "cd" || parts[0] == "restore") {
            return Ok((pos, Vec::new()));
        }
        let partial = parts[1];

        let names = match self.shell.completion_names() {
            Ok(names) => names,
            Err(err) => {
                warn!("completion failed - {}", err);
                return Ok((pos, Vec::new()));
            }
        };
        let matches: Vec<&str> = names
            .iter()
            .map(String::as_str)
            .filter(|name| name.starts_with(partial))
            .collect();
        if matches.is_empty() {
            return Ok((pos, Vec::new()));
        }

        let replacement = if matches.len() == 1 {
            matches[0].to_owned()
        } else {
            let tails: Vec<&str> = matches.iter().map(|name| &name[partial.len()..]).collect();
            format!("{}{}", partial, longest_common_prefix(&tails))
        };
        let start = parts[0].len() + 1;
        Ok((
            start,
            vec![Pair {
                display: replacement.clone(),
                replacement,
            }],
        ))
    }
}

impl Hinter for ShellHelper {
    type Hint = String;
}

impl Highlighter for ShellHelper {}

impl Validator for ShellHelper {}

impl Helper for ShellHelper {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn longest_common_prefix_definition() {
        assert_eq!(longest_common_prefix(&[]), "");
        assert_eq!(longest_common_prefix(&["alone"]), "alone");
        assert_eq!(longest_common_prefix(&["apple", "apricot"]), "ap");
        assert_eq!(longest_common_prefix(&["same", "same"]), "same");
        assert_eq!(longest_common_prefix(&["abc", "xyz"]), "");
        assert_eq!(longest_common_prefix(&["prefix", "pre"]), "pre");
        assert_eq!(longest_common_prefix(&["", "anything"]), "");
    }

    #[test]
    fn completion_extends_by_common_prefix() {
        // cd <TAB> with children apple, apricot, banana -> "ap"
        let names = vec!["apple", "apricot", "banana"];
        let partial = "";
        let matches: Vec<&str> = names.iter().copied().filter(|n| n.starts_with(partial)).collect();
        assert_eq!(matches.len(), 3);
        let tails: Vec<&str> = matches.iter().map(|n| &n[partial.len()..]).collect();
        assert_eq!(longest_common_prefix(&tails), "");

        let partial = "a";
        let matches: Vec<&str> = names.iter().copied().filter(|n| n.starts_with(partial)).collect();
        let tails: Vec<&str> = matches.iter().map(|n| &n[partial.len()..]).collect();
        assert_eq!(format!("{}{}", partial, longest_common_prefix(&tails)), "ap");
    }
}
