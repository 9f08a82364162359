use enumflags2::BitFlags;
use tabelf::{DynamicFlag, DynamicSection, ElfFile, TagType};

pub fn print(file: &ElfFile) {
    println!("{}, {} sections", file.layout(), file.section_headers().len());

    if file.dynamic_tables().is_empty() {
        println!("No dynamic section.");
    }

    for dynamic in file.dynamic_tables() {
        print_table(file, dynamic);
    }
}

fn print_table(file: &ElfFile, dynamic: &DynamicSection) {
    let name = file
        .section_name(dynamic.index)
        .map(String::from_utf8_lossy)
        .unwrap_or_default();
    let table = &dynamic.table;

    println!(
        "\nSection {} {:?} @ 0x{:x}: {} entries, {} bytes each",
        dynamic.index,
        name,
        table.offset(),
        table.len(),
        table.entry_size().total()
    );

    // Each string-valued tag is resolved separately, so count occurrences to
    // line them up with the right string.
    let mut seen = std::collections::HashMap::new();
    for entry in table.entries() {
        let tag = entry.tag_type();
        print!("  {:<24} 0x{:016x}", tag.to_string(), entry.value);

        if let TagType::Known(known) = tag {
            if known.is_string() {
                let nth = seen.entry(known).or_insert(0_usize);
                if let Some(s) = file.dynamic_entry_strings(dynamic, known).nth(*nth) {
                    print!("  {:?}", String::from_utf8_lossy(s));
                }
                *nth += 1;
            }
        }

        if let Some(flags) = entry.flags() {
            print!("  {}", describe_flags(flags));
        }
        println!();
    }
}

fn describe_flags(flags: BitFlags<DynamicFlag>) -> String {
    if flags.is_empty() {
        return "(none)".to_string();
    }

    flags
        .iter()
        .map(|flag| format!("{:?}", flag))
        .collect::<Vec<_>>()
        .join(" | ")
}
