use crate::error::Fault;
use crate::memory::Memory;
use crate::text;
use log::debug;

/// Version-3 object table layout.
const MAX_OBJECTS: u16 = 255;
const NUM_DEFAULTS: u32 = 31;
const ENTRY_SIZE: u32 = 9;
const MAX_ATTRIBUTES: u8 = 31;

const PARENT_OFFSET: u32 = 4;
const SIBLING_OFFSET: u32 = 5;
const CHILD_OFFSET: u32 = 6;
const PROP_TABLE_OFFSET: u32 = 7;

/// The object tree: a fixed table of up to 255 entries holding attribute
/// bits, parent/sibling/child links and a property-table address.
///
/// Links are plain object numbers into the same table, never pointers, so the
/// tree is a forest held together by the single-parent invariant rather than
/// by ownership. Object number 0 means "nothing".
pub struct ObjectTable {
    base: u32,
    abbrev_table: u32,
}

impl ObjectTable {
    pub fn new(object_table_addr: u16, abbrev_table_addr: u16) -> Self {
        ObjectTable {
            base: object_table_addr as u32,
            abbrev_table: abbrev_table_addr as u32,
        }
    }

    /// Byte address of an object's 9-byte entry. The defaults table sits
    /// between the table base and the first entry.
    fn entry_addr(&self, obj: u16) -> Result<u32, Fault> {
        if obj == 0 || obj > MAX_OBJECTS {
            return Err(Fault::BadObject("object number out of range"));
        }
        Ok(self.base + NUM_DEFAULTS * 2 + (obj as u32 - 1) * ENTRY_SIZE)
    }

    pub fn get_parent(&self, mem: &Memory, obj: u16) -> Result<u16, Fault> {
        if obj == 0 {
            return Ok(0);
        }
        Ok(mem.read_byte(self.entry_addr(obj)? + PARENT_OFFSET)? as u16)
    }

    pub fn get_sibling(&self, mem: &Memory, obj: u16) -> Result<u16, Fault> {
        if obj == 0 {
            return Ok(0);
        }
        Ok(mem.read_byte(self.entry_addr(obj)? + SIBLING_OFFSET)? as u16)
    }

    pub fn get_child(&self, mem: &Memory, obj: u16) -> Result<u16, Fault> {
        if obj == 0 {
            return Ok(0);
        }
        Ok(mem.read_byte(self.entry_addr(obj)? + CHILD_OFFSET)? as u16)
    }

    fn set_parent(&self, mem: &mut Memory, obj: u16, parent: u16) -> Result<(), Fault> {
        mem.write_byte(self.entry_addr(obj)? + PARENT_OFFSET, parent as u8)
    }

    fn set_sibling(&self, mem: &mut Memory, obj: u16, sibling: u16) -> Result<(), Fault> {
        mem.write_byte(self.entry_addr(obj)? + SIBLING_OFFSET, sibling as u8)
    }

    fn set_child(&self, mem: &mut Memory, obj: u16, child: u16) -> Result<(), Fault> {
        mem.write_byte(self.entry_addr(obj)? + CHILD_OFFSET, child as u8)
    }

    /// Test one of the 32 attribute flags. Bit 0 is the most significant bit
    /// of the first attribute byte.
    pub fn test_attribute(&self, mem: &Memory, obj: u16, attr: u8) -> Result<bool, Fault> {
        if obj == 0 || attr > MAX_ATTRIBUTES {
            return Ok(false);
        }
        let addr = self.entry_addr(obj)? + attr as u32 / 8;
        let byte = mem.read_byte(addr)?;
        Ok(byte & (0x80 >> (attr % 8)) != 0)
    }

    pub fn set_attribute(
        &self,
        mem: &mut Memory,
        obj: u16,
        attr: u8,
        value: bool,
    ) -> Result<(), Fault> {
        if obj == 0 || attr > MAX_ATTRIBUTES {
            debug!("ignoring attribute {} write on object {}", attr, obj);
            return Ok(());
        }
        let addr = self.entry_addr(obj)? + attr as u32 / 8;
        let mask = 0x80 >> (attr % 8);
        let byte = mem.read_byte(addr)?;
        let byte = if value { byte | mask } else { byte & !mask };
        mem.write_byte(addr, byte)
    }

    /// Detach an object from its parent, patching the sibling chain. Already
    /// detached objects are left alone; this is not a fault.
    pub fn remove_obj(&self, mem: &mut Memory, obj: u16) -> Result<(), Fault> {
        if obj == 0 {
            return Ok(());
        }
        let parent = self.get_parent(mem, obj)?;
        if parent == 0 {
            return Ok(());
        }

        let first_child = self.get_child(mem, parent)?;
        let next = self.get_sibling(mem, obj)?;
        if first_child == obj {
            self.set_child(mem, parent, next)?;
        } else {
            // Walk the chain for the predecessor and splice around obj.
            let mut current = first_child;
            while current != 0 {
                let sibling = self.get_sibling(mem, current)?;
                if sibling == obj {
                    self.set_sibling(mem, current, next)?;
                    break;
                }
                current = sibling;
            }
        }

        self.set_parent(mem, obj, 0)?;
        self.set_sibling(mem, obj, 0)
    }

    /// Move an object to the head of a new parent's child list.
    pub fn insert_obj(&self, mem: &mut Memory, obj: u16, dest: u16) -> Result<(), Fault> {
        if obj == 0 || dest == 0 {
            return Err(Fault::BadObject("insert_obj with object 0"));
        }
        self.remove_obj(mem, obj)?;
        let old_child = self.get_child(mem, dest)?;
        self.set_child(mem, dest, obj)?;
        self.set_parent(mem, obj, dest)?;
        self.set_sibling(mem, obj, old_child)
    }

    /// Address of the first property after the short name, for walking.
    fn first_prop_addr(&self, mem: &Memory, obj: u16) -> Result<u32, Fault> {
        let table = mem.read_word(self.entry_addr(obj)? + PROP_TABLE_OFFSET)? as u32;
        let name_words = mem.read_byte(table)? as u32;
        Ok(table + 1 + name_words * 2)
    }

    /// Split a size byte into (property number, data length). A zero byte
    /// terminates the table.
    fn prop_info(size_byte: u8) -> (u8, u32) {
        (size_byte & 0x1F, (size_byte >> 5) as u32 + 1)
    }

    /// Address of a property's data within an object, or 0 if the object does
    /// not hold it. Property numbers are stored in descending order, so the
    /// scan stops early once it passes where the property would sit.
    pub fn get_prop_addr(&self, mem: &Memory, obj: u16, prop: u8) -> Result<u32, Fault> {
        if obj == 0 {
            return Ok(0);
        }
        let mut addr = self.first_prop_addr(mem, obj)?;
        loop {
            let size_byte = mem.read_byte(addr)?;
            if size_byte == 0 {
                return Ok(0);
            }
            let (num, len) = Self::prop_info(size_byte);
            if num == prop {
                return Ok(addr + 1);
            }
            if num < prop {
                return Ok(0);
            }
            addr += 1 + len;
        }
    }

    /// Data length of the property whose data starts at `prop_addr`. The size
    /// byte sits immediately before the data.
    pub fn get_prop_len(&self, mem: &Memory, prop_addr: u32) -> Result<u16, Fault> {
        if prop_addr == 0 {
            return Ok(0);
        }
        let (_, len) = Self::prop_info(mem.read_byte(prop_addr - 1)?);
        Ok(len as u16)
    }

    /// Read a property value, falling back to the defaults table when the
    /// object does not hold the property. Never faults on a missing property.
    pub fn get_prop(&self, mem: &Memory, obj: u16, prop: u8) -> Result<u16, Fault> {
        let addr = self.get_prop_addr(mem, obj, prop)?;
        if addr != 0 {
            let (_, len) = Self::prop_info(mem.read_byte(addr - 1)?);
            return if len == 1 {
                Ok(mem.read_byte(addr)? as u16)
            } else {
                mem.read_word(addr)
            };
        }
        if prop == 0 || prop as u32 > NUM_DEFAULTS {
            return Ok(0);
        }
        mem.read_word(self.base + (prop as u32 - 1) * 2)
    }

    /// Write a property value. Properties cannot be created at run time, so a
    /// property absent from the object's table is a fault.
    pub fn put_prop(&self, mem: &mut Memory, obj: u16, prop: u8, value: u16) -> Result<(), Fault> {
        let addr = self.get_prop_addr(mem, obj, prop)?;
        if addr == 0 {
            debug!("put_prop: object {} has no property {}", obj, prop);
            return Err(Fault::BadObject("put_prop on a property the object lacks"));
        }
        let (_, len) = Self::prop_info(mem.read_byte(addr - 1)?);
        match len {
            1 => mem.write_byte(addr, value as u8),
            2 => mem.write_word(addr, value),
            _ => Err(Fault::BadObject("put_prop on a property wider than a word")),
        }
    }

    /// Next property number after `prop` in the object's descending order;
    /// `prop` 0 asks for the first, 0 comes back after the last.
    pub fn get_next_prop(&self, mem: &Memory, obj: u16, prop: u8) -> Result<u8, Fault> {
        if obj == 0 {
            return Ok(0);
        }
        if prop == 0 {
            let addr = self.first_prop_addr(mem, obj)?;
            let (num, _) = Self::prop_info(mem.read_byte(addr)?);
            return Ok(num);
        }
        let addr = self.get_prop_addr(mem, obj, prop)?;
        if addr == 0 {
            return Err(Fault::BadObject("get_next_prop on a missing property"));
        }
        let (_, len) = Self::prop_info(mem.read_byte(addr - 1)?);
        let (num, _) = Self::prop_info(mem.read_byte(addr + len)?);
        Ok(num)
    }

    /// Decode an object's short name for print_obj.
    pub fn short_name(&self, mem: &Memory, obj: u16) -> Result<String, Fault> {
        if obj == 0 {
            return Ok(String::new());
        }
        let table = mem.read_word(self.entry_addr(obj)? + PROP_TABLE_OFFSET)? as u32;
        let name_words = mem.read_byte(table)?;
        if name_words == 0 {
            return Ok(String::new());
        }
        let (name, _) =
            text::decode_string(mem.bytes(), table as usize + 1, self.abbrev_table as usize)?;
        Ok(name)
    }
}
