// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use {
    clap::{value_parser, Arg, ArgAction, Command},
    fdt_model::{DecodedTree, Error, NodeId},
    std::path::PathBuf,
};

fn main_impl() -> Result<(), Error> {
    env_logger::init();

    let matches = Command::new("FDT Dumper")
        .arg_required_else_help(true)
        .version("0.1")
        .about("Show the contents of Flattened Device Tree blobs")
        .arg(
            Arg::new("path")
                .action(ArgAction::Set)
                .value_parser(value_parser!(PathBuf))
                .num_args(1)
                .help("Path to device tree blob"),
        )
        .arg(
            Arg::new("action")
                .action(ArgAction::Set)
                .value_parser(["header", "reserve-map", "tree"])
                .default_value("tree")
                .help("Which content to show"),
        )
        .get_matches();

    let path = matches
        .get_one::<PathBuf>("path")
        .expect("path should be required");
    let action = matches
        .get_one::<String>("action")
        .expect("action should have a default");

    let tree = DecodedTree::from_path(path)?;

    match action.as_str() {
        "header" => {
            println!("{:#?}", tree.header());
        }
        "reserve-map" => {
            for entry in tree.reserve_map() {
                println!("address 0x{:016x} size 0x{:016x}", entry.address, entry.size);
            }
        }
        "tree" => {
            let [title, label] = tree.header_columns();
            println!("{title}: {label}");
            print_node(&tree, tree.root(), 0);
        }
        _ => unreachable!("clap restricts the action values"),
    }

    Ok(())
}

fn print_node(tree: &DecodedTree, id: NodeId, depth: usize) {
    let indent = "\t".repeat(depth);
    let node = tree.node(id);

    println!("{indent}{}", node.name());
    for property in node.properties() {
        println!("{indent}\t{} = {}", property.name(), property.display_value());
    }
    for index in 0..tree.child_count(id) {
        if let Some(child) = tree.child(id, index) {
            print_node(tree, child, depth + 1);
        }
    }
}

fn main() {
    let exit_code = match main_impl() {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("Error: {err}");
            1
        }
    };

    std::process::exit(exit_code)
}
