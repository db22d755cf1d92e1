use std::fmt;

/// Phase of a task run a command belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockType {
    SetupGroup,
    SetupTask,
    Pre,
    Main,
    Timeout,
    Post,
    TeardownTask,
    TeardownGroup,
}

impl BlockType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockType::SetupGroup => "setup_group",
            BlockType::SetupTask => "setup_task",
            BlockType::Pre => "pre",
            BlockType::Main => "task",
            BlockType::Timeout => "timeout",
            BlockType::Post => "post",
            BlockType::TeardownTask => "teardown_task",
            BlockType::TeardownGroup => "teardown_group",
        }
    }

    /// Blocks that run after the main phase regardless of its outcome.
    pub fn is_teardown(&self) -> bool {
        matches!(
            self,
            BlockType::Timeout | BlockType::Post | BlockType::TeardownTask | BlockType::TeardownGroup
        )
    }
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
