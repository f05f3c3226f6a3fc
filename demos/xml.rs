use grammar_synth::script::XmlElementCombinator;
use grammar_synth::{GeneratorConfig, GrammarBuilder, SelectionPolicy, generate};
use std::error::Error;
use std::sync::Arc;

/// Builds an XML grammar in code and shows the effect of the depth bound
fn main() -> Result<(), Box<dyn Error>> {
    let grammar = GrammarBuilder::new()
        .literal("START", "<document>{XML_CONTENT}</document>")
        .literal("XML_CONTENT", "{XML}{XML_CONTENT}")
        .literal("XML_CONTENT", "")
        .combinator("XML", &["TAG", "ATTR", "XML_CONTENT"], Arc::new(XmlElementCombinator))
        .literal("ATTR", "foo=bar")
        .literal("TAG", "some_tag")
        .literal("TAG", "other_tag")
        .regex("TAG", "[a-z]{1,8}")
        .build()?;

    for max_depth in [4, 8, 16] {
        println!("max_depth = {}", max_depth);
        for seed in 0..3 {
            let config = GeneratorConfig::default()
                .with_seed(seed)
                .with_max_depth(max_depth);
            println!("  {}", generate(&grammar, "START", &config)?);
        }
    }

    println!("declaration order:");
    let config = GeneratorConfig::default()
        .with_seed(1)
        .with_max_depth(8)
        .with_policy(SelectionPolicy::DeclarationOrder);
    println!("  {}", generate(&grammar, "START", &config)?);

    Ok(())
}
