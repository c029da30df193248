use crate::core::{
    domain::CaseStatus,
    traits::collaborators::{CheckRequest, CheckVerdict, OutputChecker},
};

/// Lines with trailing whitespace removed and trailing blank lines dropped.
pub fn normalize(output: &str) -> Vec<&str> {
    let mut lines: Vec<&str> = output.lines().map(str::trim_end).collect();
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines
}

/// Default checker comparing the program output with the `.out` fixture.
#[derive(Debug, Default, Clone)]
pub struct LineComparator;

#[async_trait::async_trait]
impl OutputChecker for LineComparator {
    async fn check(&self, request: &CheckRequest) -> Result<CheckVerdict, String> {
        let expected = tokio::fs::read_to_string(&request.answer_path)
            .await
            .map_err(|e| format!("failed to read {}: {}", request.answer_path.display(), e))?;
        let status = if normalize(&request.output) == normalize(&expected) {
            CaseStatus::AC
        } else {
            CaseStatus::WA
        };
        Ok(CheckVerdict {
            status,
            message: String::new(),
        })
    }
}
