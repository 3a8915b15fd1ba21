use thiserror::Error;

#[derive(Debug, Error)]
pub enum AsmError {
    #[error("line {line}: unknown mnemonic '{text}'")]
    UnknownMnemonic { line: usize, text: String },

    #[error("line {line}: bad operand '{text}'")]
    BadOperand { line: usize, text: String },

    #[error("line {line}: label '{name}' already defined")]
    DuplicateLabel { line: usize, name: String },

    #[error("line {line}: unknown symbol '{name}'")]
    UnknownSymbol { line: usize, name: String },

    #[error("line {line}: {what} out of range ({value})")]
    OperandRange {
        line: usize,
        what: &'static str,
        value: i64,
    },

    #[error("program has {count} instructions, the FV-1 holds at most 128")]
    ProgramTooLong { count: usize },
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("rom decodes to {count} instructions, the FV-1 holds at most 128")]
    TooManyInstructions { count: usize },

    #[error("register address {addr:#x} is out of range")]
    RegisterOutOfRange { addr: usize },
}
