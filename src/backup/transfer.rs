//! Transfer step: assembles the sync tool command line and runs it.
//!
//! Moving the bytes is the sync tool's job. This module only decides the
//! final destination, the hardlink base argument and the option list.

use crate::backup::backup_set::BackupSet;
use crate::backup::command::{CommandRunner, CommandSpec};
use crate::backup::destination::{render, Location, SETNAME_PLACEHOLDER};
use crate::backup::hanoi::RotationSlot;
use crate::backup::link::LinkBase;
use crate::backup::outcome::{SetRun, TransferLog};
use crate::backup::result_error::result::Result;

/// `--link-dest` argument for one directory, when hardlinking applies.
pub fn link_dest_arg(set: &BackupSet, base: Option<&LinkBase>, dirname: &str) -> Option<String> {
    if !*set.hardlink() || !set.program().supports_link_dest() {
        return None;
    }
    let base = base?;
    let target = Location::parse(set.layout().target(base.slot(), dirname));
    Some(format!("--link-dest={}", target.path_str()))
}

/// Full command transferring `dirname` into `slot`.
pub fn build_command(
    set: &BackupSet,
    slot: Option<RotationSlot>,
    base: Option<&LinkBase>,
    dirname: &str,
) -> CommandSpec {
    let mut argv: Vec<String> = Vec::new();
    if *set.ionice() != 0 {
        argv.extend(["ionice".to_owned(), "-c".to_owned(), set.ionice().to_string()]);
    }
    if *set.nice() != 0 {
        argv.extend(["nice".to_owned(), "-n".to_owned(), set.nice().to_string()]);
    }
    argv.push(set.program().binary().to_owned());
    argv.extend(
        set.program_opts()
            .iter()
            .map(|opt| opt.replace(SETNAME_PLACEHOLDER, &set.name().to_lowercase())),
    );
    argv.extend(link_dest_arg(set, base, dirname));
    argv.push(render(set.src(), set.name(), dirname));
    argv.push(set.layout().target(slot, dirname));

    let mut argv = argv.into_iter();
    let program = argv.next().unwrap_or_default();
    CommandSpec::new(program).with_args(argv)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransferStatus {
    pub exit_code: Option<i32>,
    pub tolerated: bool,
}

/// Runs one transfer and keeps its output as an attachment when the set mails reports.
pub fn execute<R: CommandRunner + ?Sized>(
    runner: &R,
    set: &BackupSet,
    cmd: &CommandSpec,
    dirname: &str,
    run: &mut SetRun,
) -> Result<TransferStatus> {
    run.log.info(format!("Backing up {dirname} on {} ...", set.name()));
    run.log.debug(format!("Commandline: {cmd}"));

    let output = runner.run(cmd)?;
    run.record_step(cmd.to_string(), *output.exit_code());
    if set.wants_mail() {
        run.attach(TransferLog::new(set.name(), dirname, output.combined()));
    }

    let tolerated = set.is_tolerated(*output.exit_code());
    if !output.stderr().trim().is_empty() {
        run.log.warn(format!("stderr was not empty:\n{}", output.stderr().trim_end()));
    }
    if tolerated {
        run.log.info(format!("Done. Exit status: {}", output.exit_code_str()));
    } else {
        run.log.error(format!(
            "Transfer of {dirname} failed with exit status {}",
            output.exit_code_str()
        ));
    }
    Ok(TransferStatus {
        exit_code: *output.exit_code(),
        tolerated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::backup_set::ProgramKind;
    use crate::backup::outcome::Outcome;
    use crate::backup::task::tests::ScriptedRunner;
    use lettre::message::Mailbox;

    fn rotated_set() -> BackupSet {
        BackupSet::builder()
            .name("Home")
            .backup_list(vec!["/home".to_owned()])
            .src("root@pc:{dirname}")
            .dst("/backup/{setname}")
            .hanoi(11)
            .hardlink(true)
            .program_opts(vec![
                "-a".to_owned(),
                "--exclude-from=/etc/{setname}.exclude".to_owned(),
            ])
            .build()
    }

    fn base(slot: u8) -> LinkBase {
        let slot = RotationSlot::new(slot, 11);
        let at = chrono::DateTime::parse_from_rfc3339("2024-05-01T04:00:00+00:00").unwrap();
        LinkBase::new(slot, rotated_set().layout().root(slot), at)
    }

    #[test]
    fn test_full_copy_without_base() {
        let set = rotated_set();
        let cmd = build_command(&set, RotationSlot::new(0, 11), None, "/home");
        assert_eq!(
            cmd.to_string(),
            "rsync -a --exclude-from=/etc/home.exclude root@pc:/home /backup/home.A"
        );
        assert!(!cmd.args().iter().any(|a| a.starts_with("--link-dest")));
    }

    #[test]
    fn test_link_dest_points_at_base_slot() {
        let set = rotated_set();
        let base = base(0);
        assert_eq!(
            link_dest_arg(&set, Some(&base), "/home").as_deref(),
            Some("--link-dest=/backup/home.A")
        );
        let cmd = build_command(&set, RotationSlot::new(1, 11), Some(&base), "/home");
        assert!(cmd.contains_arg("--link-dest=/backup/home.A"));
        assert_eq!(cmd.args().last().unwrap(), "/backup/home.B");
    }

    #[test]
    fn test_no_link_dest_when_disabled_or_rclone() {
        let base = base(0);
        let plain = BackupSet::builder()
            .name("Home")
            .backup_list(vec!["/home".to_owned()])
            .src("{dirname}")
            .dst("/backup/{setname}")
            .build();
        assert_eq!(link_dest_arg(&plain, Some(&base), "/home"), None);

        let rclone = BackupSet::builder()
            .name("Home")
            .backup_list(vec!["/home".to_owned()])
            .src("{dirname}")
            .dst("s3:bucket/{setname}")
            .hardlink(true)
            .program(ProgramKind::Rclone)
            .program_opts(vec!["sync".to_owned()])
            .build();
        assert_eq!(link_dest_arg(&rclone, Some(&base), "/home"), None);
        assert_eq!(
            build_command(&rclone, None, Some(&base), "/home").to_string(),
            "rclone sync /home s3:bucket/home"
        );
    }

    #[test]
    fn test_nice_and_ionice_wrap_the_program() {
        let set = BackupSet::builder()
            .name("db")
            .backup_list(vec!["/var/lib/db".to_owned()])
            .src("{dirname}")
            .dst("/backup/{setname}{dirname}")
            .nice(10)
            .ionice(3)
            .build();
        let cmd = build_command(&set, None, None, "/var/lib/db");
        assert_eq!(
            cmd.to_string(),
            "ionice -c 3 nice -n 10 rsync /var/lib/db /backup/db/var/lib/db"
        );
    }

    #[test]
    fn test_execute_classifies_exit_codes() {
        let set = BackupSet::builder()
            .name("home")
            .backup_list(vec!["/home".to_owned()])
            .src("{dirname}")
            .dst("/backup/{setname}")
            .tolerated_exit_codes(vec![0, 24])
            .mail_to(vec!["ops@example.com".parse::<Mailbox>().unwrap()])
            .build();
        let runner = ScriptedRunner::failing([("/backup/home", 24)]);
        let cmd = build_command(&set, None, None, "/home");
        let mut run = SetRun::start("home");

        let status = execute(&runner, &set, &cmd, "/home", &mut run).unwrap();
        assert_eq!(
            status,
            TransferStatus {
                exit_code: Some(24),
                tolerated: true
            }
        );

        let runner = ScriptedRunner::failing([("/backup/home", 23)]);
        let status = execute(&runner, &set, &cmd, "/home", &mut run).unwrap();
        assert!(!status.tolerated);

        let result = run.conclude(Outcome::Success);
        assert_eq!(result.transfer_logs().len(), 2);
        assert_eq!(result.steps()[1].exit_code(), &Some(23));
    }
}
