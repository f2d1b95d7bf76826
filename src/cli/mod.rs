// New CLI surface (§6): `install <tool>`, `plan <tool>`, `resume <plan-id>`,
// `pending`. Realizes the teacher's unused `dialoguer`/`prettytable-rs`
// dependencies as actual interactive prompts and table rendering (§10.5).

pub mod commands;
