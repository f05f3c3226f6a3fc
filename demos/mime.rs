use grammar_synth::script::MimeMacCombinator;
use grammar_synth::{Generator, GeneratorConfig, Grammar};
use std::error::Error;
use std::path::Path;

/// Generates MIME messages and checks the MAC line of each one
fn main() -> Result<(), Box<dyn Error>> {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("grammars/mime.grammar");
    let grammar = Grammar::from_file(path)?;

    println!("Non-terminals: {}", grammar.non_terminals().join(", "));

    let generator = Generator::new(&grammar, GeneratorConfig::default().with_seed(7));
    for (i, message) in generator.generate_many("START", 3)?.iter().enumerate() {
        let text = message.to_string_lossy();
        println!("--- message {} ({} bytes) ---", i + 1, message.len());
        println!("{}", text);

        let Some((header, rest)) = text.split_once("\nX-MAC:") else {
            return Err("message has no MAC line".into());
        };
        let Some((mac, body)) = rest.split_once("\n\n") else {
            return Err("message has no body".into());
        };
        let expected = MimeMacCombinator::digest(header.as_bytes(), body.as_bytes());
        println!("MAC valid: {}", mac == expected);
    }

    Ok(())
}
