/// Direction of a query.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Read,
    Write,
}

/// Lifecycle of a block or box query.
///
/// `Created -> Running -> Ok | Failed`; the terminal states never change
/// again. A box query stays `Running` across resolution passes and only
/// reaches `Ok` once its last target resolution completed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum QueryStatus {
    #[default]
    Created,
    Running,
    Ok,
    Failed(String),
}

impl QueryStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ok | Self::Failed(_))
    }
}
