use crate::backup::backup_set::BackupSet;
use crate::backup::compress::LogCompression;
use crate::backup::outcome::ExecutionResult;
use crate::backup::result_error::result::Result;
use getset::Getters;

pub mod smtp;

#[derive(Clone, Debug, PartialEq, Eq, Getters)]
#[getset(get = "pub")]
pub struct ReportAttachment {
    file_name: String,
    content_type: &'static str,
    data: Vec<u8>,
}

/// Email summary of one set's pass.
#[derive(Clone, Debug, PartialEq, Eq, Getters)]
#[getset(get = "pub")]
pub struct Report {
    subject: String,
    body: String,
    attachments: Vec<ReportAttachment>,
}

impl Report {
    /// Subject `Backup of <set> OK|FAILED`, body is the set log followed by the outcome.
    pub fn compose(result: &ExecutionResult, compression: LogCompression) -> Result<Self> {
        let attachments = result
            .transfer_logs()
            .iter()
            .map(|log| {
                let file_name = match compression.file_ext() {
                    Some(ext) => format!("{}.{ext}", log.name()),
                    None => log.name().clone(),
                };
                Ok(ReportAttachment {
                    file_name,
                    content_type: compression.content_type(),
                    data: compression.compress(log.content().as_bytes())?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut body = result.log().clone();
        body.push_str(&format!(
            "\nSet {} {}. Took: {}\n",
            result.set_name(),
            result.outcome(),
            humantime::format_duration(std::time::Duration::from_secs(
                result.elapsed().as_secs()
            ))
        ));
        if !attachments.is_empty() {
            body.push_str("\nDetailed logs are attached.\n");
        }

        Ok(Self {
            subject: format!(
                "Backup of {} {}",
                result.set_name(),
                result.outcome().label()
            ),
            body,
            attachments,
        })
    }
}

/// Delivers reports to the recipients configured on a set.
pub trait Notification {
    fn send(&self, set: &BackupSet, report: &Report) -> Result<()>;
}
